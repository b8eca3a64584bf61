// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Append-only JSON Lines file backend

use super::backend::Storage;
use crate::config::FileConfig;
use crate::error::{AuditError, Result};
use crate::filter::{paginate, QueryFilter};
use crate::record::Record;
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Default per-line ceiling when reading records back
pub const DEFAULT_MAX_RECORD_SIZE: usize = 1024 * 1024;

/// File backend writing one JSON record per line
///
/// All writers are serialized through a single mutex and every write is
/// flushed before returning. The path must come from trusted configuration;
/// a path that is a symbolic link is refused.
pub struct FileStorage {
    path: PathBuf,
    max_record_size: usize,
    file: Mutex<Option<File>>,
}

impl FileStorage {
    pub async fn new(config: FileConfig) -> Result<Self> {
        if config.path.trim().is_empty() {
            return Err(AuditError::Config(
                "file path is required for file storage".to_string(),
            ));
        }

        let path = PathBuf::from(&config.path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                ensure_directory(parent).await?;
            }
        }

        let file = open_append(&path).await?;

        info!("Audit file storage opened at: {}", path.display());

        let max_record_size = if config.max_record_size == 0 {
            DEFAULT_MAX_RECORD_SIZE
        } else {
            config.max_record_size
        };

        Ok(Self {
            path,
            max_record_size,
            file: Mutex::new(Some(file)),
        })
    }

    /// Open with default settings
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(FileConfig {
            path: path.as_ref().to_string_lossy().to_string(),
            max_record_size: DEFAULT_MAX_RECORD_SIZE,
        })
        .await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn max_record_size(&self) -> usize {
        self.max_record_size
    }

    /// Move the current file aside with a timestamp suffix and start a fresh one
    ///
    /// Returns the path the old content was moved to. Writers waiting on the
    /// lock continue into the new file.
    pub async fn rotate(&self) -> Result<PathBuf> {
        let mut guard = self.file.lock().await;
        let mut current = guard.take().ok_or(AuditError::Closed)?;
        current.flush().await?;
        drop(current);

        let rotated = self.rotated_path().await?;
        if let Err(e) = fs::rename(&self.path, &rotated).await {
            warn!(
                "Failed to rotate {} -> {}: {}",
                self.path.display(),
                rotated.display(),
                e
            );
            *guard = Some(open_append(&self.path).await?);
            return Err(e.into());
        }

        *guard = Some(open_append(&self.path).await?);

        info!(
            "Rotated audit file {} -> {}",
            self.path.display(),
            rotated.display()
        );
        Ok(rotated)
    }

    async fn rotated_path(&self) -> Result<PathBuf> {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let base = format!("{}.{}", self.path.display(), stamp);

        let mut candidate = PathBuf::from(&base);
        let mut n = 1;
        while fs::try_exists(&candidate).await? {
            candidate = PathBuf::from(format!("{}-{}", base, n));
            n += 1;
        }
        Ok(candidate)
    }
}

/// Create a directory tree readable by the owner only
async fn ensure_directory(dir: &Path) -> Result<()> {
    if fs::metadata(dir).await.is_ok() {
        return Ok(());
    }

    debug!("Creating audit directory: {}", dir.display());
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o700);
    builder.create(dir).await?;
    Ok(())
}

async fn refuse_symlink(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path).await {
        Ok(meta) if meta.file_type().is_symlink() => Err(AuditError::Config(format!(
            "refusing to open symbolic link: {}",
            path.display()
        ))),
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn open_append(path: &Path) -> Result<File> {
    refuse_symlink(path).await?;

    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    options.mode(0o600);

    Ok(options.open(path).await?)
}

/// Read one line into `line` without buffering more than `max` bytes of it
///
/// Returns `None` at end of input, otherwise whether the line exceeded `max`
/// (in which case `line` is left empty and the rest of the line is discarded).
async fn read_bounded_line<R>(reader: &mut R, line: &mut Vec<u8>, max: usize) -> io::Result<Option<bool>>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    let mut oversized = false;
    let mut read_any = false;

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(read_any.then_some(oversized));
        }
        read_any = true;

        let newline = available.iter().position(|&b| b == b'\n');
        let take = newline.unwrap_or(available.len());

        if !oversized {
            if line.len() + take > max {
                oversized = true;
                line.clear();
            } else {
                line.extend_from_slice(&available[..take]);
            }
        }

        let consumed = newline.map_or(take, |i| i + 1);
        reader.consume(consumed);

        if newline.is_some() {
            return Ok(Some(oversized));
        }
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn write(&self, record: &Record) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        if line.len() > self.max_record_size {
            return Err(AuditError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "record of {} bytes exceeds max record size {}",
                    line.len(),
                    self.max_record_size
                ),
            )));
        }
        line.push(b'\n');

        let mut guard = self.file.lock().await;
        let file = guard.as_mut().ok_or(AuditError::Closed)?;

        file.write_all(&line).await?;
        file.flush().await?;

        debug!(
            event_type = %record.event_type,
            bytes = line.len(),
            "Appended audit record to {}",
            self.path.display()
        );

        Ok(())
    }

    async fn query(&self, filter: &QueryFilter) -> Result<Vec<Record>> {
        let filter = filter.normalized();

        // Held for the whole scan so rotation cannot swap the file underneath.
        let _guard = self.file.lock().await;

        let file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut reader = BufReader::new(file);
        let mut line = Vec::new();
        let mut matched = Vec::new();
        let mut skipped = 0usize;

        while let Some(oversized) =
            read_bounded_line(&mut reader, &mut line, self.max_record_size).await?
        {
            if oversized {
                skipped += 1;
                continue;
            }

            let content = line.strip_suffix(b"\r").unwrap_or(&line[..]);
            if content.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }

            match Record::from_json(content) {
                Ok(record) if filter.matches(&record) => matched.push(record),
                Ok(_) => {}
                Err(e) => {
                    skipped += 1;
                    debug!("Skipping malformed audit line: {}", e);
                }
            }
        }

        if skipped > 0 {
            debug!(
                "Skipped {} unreadable lines in {}",
                skipped,
                self.path.display()
            );
        }

        // Newest appended first; the stable sort keeps that order for equal timestamps.
        matched.reverse();
        Ok(paginate(matched, &filter))
    }

    async fn close(&self) -> Result<()> {
        let mut guard = self.file.lock().await;
        if let Some(mut file) = guard.take() {
            file.flush().await?;
            file.sync_all().await?;
            info!("Closed audit file storage: {}", self.path.display());
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        if self.file.lock().await.is_none() {
            warn!("Health check failed - file storage is closed");
            return Ok(false);
        }

        match fs::metadata(&self.path).await {
            Ok(metadata) if metadata.is_file() => Ok(true),
            Ok(_) => {
                warn!(
                    "Health check failed - audit path is not a regular file: {}",
                    self.path.display()
                );
                Ok(false)
            }
            Err(e) => {
                warn!(
                    "Health check failed - cannot access {}: {}",
                    self.path.display(),
                    e
                );
                Ok(false)
            }
        }
    }

    fn backend_type(&self) -> &str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{EventResult, EventType};
    use tempfile::TempDir;

    async fn create_test_storage() -> (FileStorage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("logs").join("audit.jsonl");
        let storage = FileStorage::open(&path).await.unwrap();
        (storage, temp_dir)
    }

    fn record(ts: i64, user: &str) -> Record {
        Record::new(EventType::LoginSuccess, EventResult::Success)
            .with_user_id(user)
            .with_timestamp(ts)
    }

    #[tokio::test]
    async fn test_write_appends_json_lines() {
        let (storage, _temp_dir) = create_test_storage().await;

        storage.write(&record(1, "a")).await.unwrap();
        storage.write(&record(2, "b")).await.unwrap();

        let content = std::fs::read_to_string(storage.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"user_id\":\"a\""));
        assert!(content.ends_with('\n'));
    }

    #[tokio::test]
    async fn test_query_skips_malformed_and_oversized_lines() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("audit.jsonl");
        let storage = FileStorage::new(FileConfig {
            path: path.to_string_lossy().to_string(),
            max_record_size: 256,
        })
        .await
        .unwrap();

        storage.write(&record(10, "first")).await.unwrap();
        {
            use std::io::Write;
            let mut raw = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            writeln!(raw, "not json at all").unwrap();
            writeln!(raw, "{{\"event_type\":\"logout\",\"result\":\"success\",\"reason\":\"{}\"}}", "x".repeat(1000)).unwrap();
            writeln!(raw).unwrap();
        }
        storage.write(&record(20, "second")).await.unwrap();

        let results = storage.query(&QueryFilter::default()).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].user_id.as_deref(), Some("second"));
        assert_eq!(results[1].user_id.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_query_missing_file_is_empty() {
        let (storage, _temp_dir) = create_test_storage().await;
        std::fs::remove_file(storage.path()).unwrap();

        let results = storage.query(&QueryFilter::default()).await.unwrap();
        assert!(results.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_refuses_symlink() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("target.log");
        std::fs::write(&target, b"data").unwrap();
        let link = temp_dir.path().join("audit.jsonl");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let result = FileStorage::open(&link).await;
        assert!(matches!(result, Err(AuditError::Config(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_owner_only_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let (storage, temp_dir) = create_test_storage().await;

        let file_mode = std::fs::metadata(storage.path()).unwrap().permissions().mode();
        assert_eq!(file_mode & 0o777, 0o600);

        let dir_mode = std::fs::metadata(temp_dir.path().join("logs"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(dir_mode & 0o777, 0o700);
    }

    #[tokio::test]
    async fn test_rotate_starts_fresh_file() {
        let (storage, _temp_dir) = create_test_storage().await;

        storage.write(&record(1, "before")).await.unwrap();
        let rotated = storage.rotate().await.unwrap();
        storage.write(&record(2, "after")).await.unwrap();

        let old = std::fs::read_to_string(&rotated).unwrap();
        assert!(old.contains("before"));
        assert!(!old.contains("after"));

        let results = storage.query(&QueryFilter::default()).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].user_id.as_deref(), Some("after"));
    }

    #[tokio::test]
    async fn test_rotate_twice_in_same_second() {
        let (storage, _temp_dir) = create_test_storage().await;

        storage.write(&record(1, "one")).await.unwrap();
        let first = storage.rotate().await.unwrap();
        storage.write(&record(2, "two")).await.unwrap();
        let second = storage.rotate().await.unwrap();

        assert_ne!(first, second);
        assert!(first.exists());
        assert!(second.exists());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_blocks_writes() {
        let (storage, _temp_dir) = create_test_storage().await;

        storage.write(&record(1, "a")).await.unwrap();
        storage.close().await.unwrap();
        storage.close().await.unwrap();

        let result = storage.write(&record(2, "b")).await;
        assert!(matches!(result, Err(AuditError::Closed)));

        // Reads keep working against the closed file
        let results = storage.query(&QueryFilter::default()).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_health_check() {
        let (storage, _temp_dir) = create_test_storage().await;
        assert!(storage.health_check().await.unwrap());

        storage.close().await.unwrap();
        assert!(!storage.health_check().await.unwrap());
    }

    #[tokio::test]
    async fn test_read_bounded_line() {
        let data: &[u8] = b"short\nthis line is far too long\nok";
        let mut reader = BufReader::new(data);
        let mut line = Vec::new();

        assert_eq!(read_bounded_line(&mut reader, &mut line, 10).await.unwrap(), Some(false));
        assert_eq!(line, b"short");
        assert_eq!(read_bounded_line(&mut reader, &mut line, 10).await.unwrap(), Some(true));
        assert!(line.is_empty());
        assert_eq!(read_bounded_line(&mut reader, &mut line, 10).await.unwrap(), Some(false));
        assert_eq!(line, b"ok");
        assert_eq!(read_bounded_line(&mut reader, &mut line, 10).await.unwrap(), None);
    }
}
