//! Tar archives sent to the daemon: build contexts and file uploads.

use std::path::Path;

use bytes::Bytes;
use harbortest_common::error::{HarborError, Result};

/// Packs a build context directory into an uncompressed tar archive.
///
/// Entries are stored relative to `dir`, which is what the daemon expects
/// of a build context.
///
/// # Errors
///
/// Returns an error if `dir` is not a directory or cannot be read.
pub fn archive_directory(dir: &Path) -> Result<Bytes> {
    tracing::debug!(context = %dir.display(), "archiving build context");
    let io_err = |e| HarborError::Io {
        path: dir.to_path_buf(),
        source: e,
    };

    if !dir.is_dir() {
        return Err(HarborError::Config {
            message: format!("build context {} is not a directory", dir.display()),
        });
    }

    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);
    builder.append_dir_all(".", dir).map_err(io_err)?;
    let buf = builder.into_inner().map_err(io_err)?;
    Ok(Bytes::from(buf))
}

/// Wraps a host file in a single-entry tar archive named `entry_name`,
/// carrying the given permission bits.
///
/// # Errors
///
/// Returns an error if the host file cannot be read.
pub fn archive_file(host_path: &Path, entry_name: &str, mode: u32) -> Result<Bytes> {
    let io_err = |e| HarborError::Io {
        path: host_path.to_path_buf(),
        source: e,
    };

    let content = std::fs::read(host_path).map_err(io_err)?;

    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(mode);
    header.set_entry_type(tar::EntryType::Regular);

    let mut builder = tar::Builder::new(Vec::new());
    builder
        .append_data(&mut header, entry_name, content.as_slice())
        .map_err(io_err)?;
    let buf = builder.into_inner().map_err(io_err)?;
    Ok(Bytes::from(buf))
}

/// Splits an absolute container path into the directory to upload into and
/// the file name of the entry.
///
/// # Errors
///
/// Returns an error if the path has no file name component.
pub fn split_container_path(container_path: &str) -> Result<(String, String)> {
    let trimmed = container_path.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some((dir, name)) if !name.is_empty() => {
            let dir = if dir.is_empty() { "/" } else { dir };
            Ok((dir.to_string(), name.to_string()))
        }
        None if !trimmed.is_empty() => Ok((".".to_string(), trimmed.to_string())),
        _ => Err(HarborError::Config {
            message: format!("container path {container_path:?} does not name a file"),
        }),
    }
}
