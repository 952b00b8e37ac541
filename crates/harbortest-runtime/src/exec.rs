//! Command execution inside running containers.

use crate::logs::{LogLine, LogSource};

/// Output from a command executed with `docker exec`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    /// Exit code reported by the daemon once the command finished.
    pub exit_code: i64,
    /// Interleaved stdout/stderr frames in the order they were received.
    pub output: Vec<LogLine>,
}

impl ExecResult {
    /// Returns `true` if the command exited with status 0.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Concatenated standard output, decoded lossily.
    #[must_use]
    pub fn stdout(&self) -> String {
        self.collect(LogSource::StdOut)
    }

    /// Concatenated standard error, decoded lossily.
    #[must_use]
    pub fn stderr(&self) -> String {
        self.collect(LogSource::StdErr)
    }

    fn collect(&self, source: LogSource) -> String {
        let bytes: Vec<u8> = self
            .output
            .iter()
            .filter(|line| line.source == source)
            .flat_map(|line| line.content.iter().copied())
            .collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_streams() {
        let result = ExecResult {
            exit_code: 0,
            output: vec![
                LogLine::stdout("PONG"),
                LogLine::stderr("warn: "),
                LogLine::stdout("\n"),
                LogLine::stderr("slow"),
            ],
        };
        assert!(result.success());
        assert_eq!(result.stdout(), "PONG\n");
        assert_eq!(result.stderr(), "warn: slow");
    }

    #[test]
    fn nonzero_exit_is_not_success() {
        let result = ExecResult {
            exit_code: 127,
            output: Vec::new(),
        };
        assert!(!result.success());
        assert!(result.stdout().is_empty());
    }
}
