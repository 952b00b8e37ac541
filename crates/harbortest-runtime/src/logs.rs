//! Container log frames, consumers, and the background log producer.

use std::borrow::Cow;
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use harbortest_common::error::{HarborError, Result};
use harbortest_common::types::ContainerId;
use tokio::task::JoinHandle;

/// Stream a log frame was written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogSource {
    /// Standard output (also used for TTY console output).
    StdOut,
    /// Standard error.
    StdErr,
}

/// A single frame of container output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    /// Stream the frame came from.
    pub source: LogSource,
    /// Raw frame bytes, usually one line including its newline.
    pub content: Bytes,
}

impl LogLine {
    /// Creates a stdout frame.
    pub fn stdout(content: impl Into<Bytes>) -> Self {
        Self {
            source: LogSource::StdOut,
            content: content.into(),
        }
    }

    /// Creates a stderr frame.
    pub fn stderr(content: impl Into<Bytes>) -> Self {
        Self {
            source: LogSource::StdErr,
            content: content.into(),
        }
    }

    /// Frame content decoded as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }
}

/// Concatenates frames into the combined output Docker would print.
#[must_use]
pub fn combined_output(lines: &[LogLine]) -> Vec<u8> {
    lines
        .iter()
        .flat_map(|line| line.content.iter().copied())
        .collect()
}

/// Stream of log frames from a followed container.
pub type LogStream = Pin<Box<dyn Stream<Item = Result<LogLine>> + Send>>;

/// Receives log frames while a log producer is running.
pub trait LogConsumer: Send + Sync {
    /// Called once per frame, in arrival order.
    fn accept(&self, line: &LogLine);
}

impl<F> LogConsumer for F
where
    F: Fn(&LogLine) + Send + Sync,
{
    fn accept(&self, line: &LogLine) {
        self(line);
    }
}

/// Shared, growable set of consumers.
///
/// Clones share the same list, so consumers added while a producer is
/// running receive every frame that arrives after they were added.
#[derive(Clone, Default)]
pub struct LogConsumers {
    inner: Arc<RwLock<Vec<Arc<dyn LogConsumer>>>>,
}

impl fmt::Debug for LogConsumers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogConsumers").field("len", &self.len()).finish()
    }
}

impl LogConsumers {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a consumer.
    pub fn push(&self, consumer: Arc<dyn LogConsumer>) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(consumer);
    }

    /// Number of registered consumers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` if no consumer is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hands `line` to every consumer registered right now.
    pub fn dispatch(&self, line: &LogLine) {
        let consumers = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        for consumer in consumers.iter() {
            consumer.accept(line);
        }
    }
}

/// Consumer that keeps every frame it receives in memory.
#[derive(Debug, Clone, Default)]
pub struct LogCollector {
    lines: Arc<Mutex<Vec<LogLine>>>,
}

impl LogCollector {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the frames collected so far.
    #[must_use]
    pub fn lines(&self) -> Vec<LogLine> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// Returns the collected output as lossily decoded text.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&combined_output(&self.lines())).into_owned()
    }
}

impl LogConsumer for LogCollector {
    fn accept(&self, line: &LogLine) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.clone());
        }
    }
}

/// Background task forwarding a followed log stream to consumers.
///
/// The task ends when the stream ends (the container exited) or when the
/// producer is stopped or dropped.
#[derive(Debug)]
pub struct LogProducer {
    handle: JoinHandle<()>,
}

impl LogProducer {
    /// Spawns the producer on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if called outside a tokio runtime.
    pub fn spawn(
        id: &ContainerId,
        mut stream: LogStream,
        consumers: LogConsumers,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| HarborError::Config {
            message: "log producer requires a tokio runtime".into(),
        })?;
        let id = id.clone();
        let handle = runtime.spawn(async move {
            tracing::debug!(id = %id.short(), consumers = consumers.len(), "log producer started");
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(line) => consumers.dispatch(&line),
                    Err(e) => {
                        tracing::warn!(id = %id.short(), error = %e, "log stream failed");
                        break;
                    }
                }
            }
            tracing::debug!(id = %id.short(), "log producer finished");
        });
        Ok(Self { handle })
    }

    /// Returns `true` once the followed stream has ended.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stops forwarding and waits for the task to wind down.
    pub async fn stop(mut self) {
        self.handle.abort();
        let _ = (&mut self.handle).await;
    }
}

impl Drop for LogProducer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_of(lines: Vec<LogLine>) -> LogStream {
        Box::pin(futures::stream::iter(lines.into_iter().map(Ok)))
    }

    #[test]
    fn combined_output_preserves_order() {
        let lines = [LogLine::stdout("a\n"), LogLine::stderr("b\n"), LogLine::stdout("c\n")];
        assert_eq!(combined_output(&lines), b"a\nb\nc\n");
    }

    #[test]
    fn text_decodes_lossily() {
        let line = LogLine::stdout(vec![b'o', b'k', 0xff]);
        assert_eq!(line.text(), "ok\u{fffd}");
    }

    fn consumers_of(collectors: &[&LogCollector]) -> LogConsumers {
        let consumers = LogConsumers::new();
        for collector in collectors {
            consumers.push(Arc::new((*collector).clone()));
        }
        consumers
    }

    #[tokio::test]
    async fn producer_forwards_to_every_consumer() {
        let first = LogCollector::new();
        let second = LogCollector::new();

        let producer = LogProducer::spawn(
            &ContainerId::new("c1"),
            stream_of(vec![LogLine::stdout("one\n"), LogLine::stderr("two\n")]),
            consumers_of(&[&first, &second]),
        )
        .unwrap();
        while !producer.is_finished() {
            tokio::task::yield_now().await;
        }

        assert_eq!(first.text(), "one\ntwo\n");
        assert_eq!(second.lines().len(), 2);
    }

    #[tokio::test]
    async fn consumers_added_while_running_see_later_frames() {
        let (tx, rx) = futures::channel::mpsc::unbounded::<Result<LogLine>>();
        let early = LogCollector::new();
        let consumers = consumers_of(&[&early]);
        let producer =
            LogProducer::spawn(&ContainerId::new("c5"), Box::pin(rx), consumers.clone()).unwrap();

        tx.unbounded_send(Ok(LogLine::stdout("first\n"))).unwrap();
        while early.lines().is_empty() {
            tokio::task::yield_now().await;
        }

        let late = LogCollector::new();
        consumers.push(Arc::new(late.clone()));
        tx.unbounded_send(Ok(LogLine::stdout("second\n"))).unwrap();
        drop(tx);
        while !producer.is_finished() {
            tokio::task::yield_now().await;
        }

        assert_eq!(early.text(), "first\nsecond\n");
        assert_eq!(late.text(), "second\n");
    }

    #[tokio::test]
    async fn closures_are_consumers() {
        let seen = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&seen);
        let consumers = LogConsumers::new();
        consumers.push(Arc::new(move |_: &LogLine| {
            *counter.lock().unwrap() += 1;
        }));

        let producer = LogProducer::spawn(
            &ContainerId::new("c2"),
            stream_of(vec![LogLine::stdout("x"), LogLine::stdout("y")]),
            consumers,
        )
        .unwrap();
        while !producer.is_finished() {
            tokio::task::yield_now().await;
        }
        assert_eq!(*seen.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn stop_ends_a_pending_stream() {
        let collector = LogCollector::new();
        let producer = LogProducer::spawn(
            &ContainerId::new("c3"),
            Box::pin(futures::stream::pending::<Result<LogLine>>()),
            consumers_of(&[&collector]),
        )
        .unwrap();
        producer.stop().await;
        assert!(collector.lines().is_empty());
    }

    #[test]
    fn spawn_outside_runtime_is_an_error() {
        let err = LogProducer::spawn(
            &ContainerId::new("c4"),
            stream_of(Vec::new()),
            LogConsumers::new(),
        )
        .unwrap_err();
        assert!(matches!(err, HarborError::Config { .. }));
    }
}
