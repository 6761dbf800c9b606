//! Filesystem helpers for crash-safe document writes.

use std::io::{self, Write};
use std::path::Path;

use rand::TryRngCore;
use serde::Serialize;
use time::OffsetDateTime;

const TEMP_CREATE_ATTEMPTS: usize = 5;

/// Point-in-time metadata for one file the service owns.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FileStatus {
    pub path: String,
    pub exists: bool,
    pub size: Option<u64>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_modified: Option<OffsetDateTime>,
}

impl FileStatus {
    /// Stat `path`; a missing or unreadable file reports `exists = false`.
    pub fn probe(path: &Path) -> Self {
        let display = path.display().to_string();
        match std::fs::metadata(path) {
            Ok(meta) => Self {
                path: display,
                exists: true,
                size: Some(meta.len()),
                last_modified: meta.modified().ok().map(OffsetDateTime::from),
            },
            Err(_) => Self {
                path: display,
                exists: false,
                size: None,
                last_modified: None,
            },
        }
    }
}

/// Write `data` to `path` through a synced temp file and a rename, so readers
/// only ever see the old or the new document.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::other("path has no parent directory"))?;
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::other("path has no file name"))?;

    let mut last_err = None;
    for _ in 0..TEMP_CREATE_ATTEMPTS {
        let mut bytes = [0u8; 6];
        rand::rngs::OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|err| io::Error::other(format!("failed to generate temp suffix: {err}")))?;
        let suffix: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
        let tmp_path = dir.join(format!("{}.tmp-{}", file_name.to_string_lossy(), suffix));

        let file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path);
        let mut file = match file {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                last_err = Some(err);
                continue;
            }
            Err(err) => return Err(err),
        };

        if let Err(err) = file.write_all(data).and_then(|_| file.sync_all()) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(err);
        }
        drop(file);
        if let Err(err) = replace_file(&tmp_path, path) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(err);
        }
        return sync_parent_dir(dir);
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!(
            "failed to create temporary file for {}: {}",
            path.display(),
            last_err
                .as_ref()
                .map(|err| err.to_string())
                .unwrap_or_else(|| "unknown error".into())
        ),
    ))
}

/// Append one line to `path`, creating the file when missing, and sync it.
pub fn append_line(path: &Path, line: &str) -> io::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")?;
    file.sync_data()
}

fn replace_file(temp_path: &Path, path: &Path) -> io::Result<()> {
    match std::fs::rename(temp_path, path) {
        Ok(()) => Ok(()),
        Err(err) => {
            #[cfg(target_os = "windows")]
            if err.kind() == io::ErrorKind::AlreadyExists
                || err.kind() == io::ErrorKind::PermissionDenied
            {
                if let Err(inner) = std::fs::remove_file(path) {
                    if inner.kind() != io::ErrorKind::NotFound {
                        return Err(inner);
                    }
                }
                std::fs::rename(temp_path, path)?;
                return Ok(());
            }
            Err(err)
        }
    }
}

fn sync_parent_dir(dir: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        std::fs::File::open(dir)?.sync_all()?;
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
    Ok(())
}
