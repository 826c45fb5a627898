use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use super::content::{FileBody, FileContent, FileEntry, LineLimit, LogQuery};
use super::reverse::{ReadError, ReadOutcome, ReverseLineReader};

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("open {}: {}", .dir.display(), .source)]
    DirectoryUnavailable {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("request did not complete within {0:?}")]
    DeadlineExceeded(Duration),

    #[error("request cancelled")]
    Cancelled,
}

/// Reads the tail of every file in one directory, one task per file.
pub struct DirectoryCollector {
    dir: PathBuf,
    reader: ReverseLineReader,
    permits: Arc<Semaphore>,
    timeout: Option<Duration>,
}

/// Single result a per-file task sends back to the collector
enum FileOutcome {
    Done { content: FileContent, filtered: bool },
    Cancelled,
}

impl DirectoryCollector {
    pub fn new(dir: impl Into<PathBuf>, reader: ReverseLineReader, max_concurrency: usize) -> Self {
        Self {
            dir: dir.into(),
            reader,
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
            timeout: None,
        }
    }

    /// Abort the whole request once `timeout` has elapsed
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Collect the newest lines of every non-excluded file, most recently
    /// modified file first. Only a failure to list the directory itself (or
    /// the deadline) fails the request; per-file problems end up on the
    /// file's `error`.
    pub async fn collect(&self, query: &LogQuery) -> Result<Vec<FileContent>, CollectError> {
        let cancel = CancellationToken::new();
        // Stops in-flight reads if we return early or get dropped
        let _guard = cancel.clone().drop_guard();

        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.collect_until(query, &cancel))
                .await
                .map_err(|_| {
                    tracing::warn!(dir = %self.dir.display(), timeout = ?limit, "Log collection timed out");
                    CollectError::DeadlineExceeded(limit)
                })?,
            None => self.collect_until(query, &cancel).await,
        }
    }

    /// Same as `collect`, but stops when `cancel` fires instead of on a timer.
    pub async fn collect_until(
        &self,
        query: &LogQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<FileContent>, CollectError> {
        let entries = list_files(&self.dir).await?;
        let entries: Vec<FileEntry> = entries
            .into_iter()
            .filter(|e| !query.is_excluded(&e.extension()))
            .collect();

        let expected = entries.len();
        let (tx, mut rx) = mpsc::channel(expected.max(1));

        for entry in entries {
            let tx = tx.clone();
            let permits = self.permits.clone();
            let reader = self.reader;
            let limit = query.limit;
            let search = query.search.clone();
            let cancel = cancel.clone();

            tokio::spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                if cancel.is_cancelled() {
                    let _ = tx.send(FileOutcome::Cancelled).await;
                    return;
                }

                let fallback = entry.clone();
                let outcome = tokio::task::spawn_blocking(move || {
                    read_entry(reader, entry, limit, search.as_deref(), &cancel)
                })
                .await
                .unwrap_or_else(|e| {
                    tracing::error!(path = %fallback.path.display(), error = %e, "File read task failed");
                    task_failed(&fallback, &e)
                });
                let _ = tx.send(outcome).await;
            });
        }
        drop(tx);

        let search_active = query.search.is_some();
        let mut files = Vec::with_capacity(expected);
        while let Some(outcome) = rx.recv().await {
            match outcome {
                FileOutcome::Done { content, filtered } => {
                    if keep_entry(&content, filtered, search_active) {
                        files.push(content);
                    }
                }
                FileOutcome::Cancelled => return Err(CollectError::Cancelled),
            }
        }

        files.sort_by(|a, b| b.modified.cmp(&a.modified));

        tracing::debug!(
            dir = %self.dir.display(),
            candidates = expected,
            returned = files.len(),
            "Collected log files"
        );

        Ok(files)
    }
}

/// List the regular files of `dir`. Symlinks are followed; entries whose
/// metadata can't be read are skipped.
pub async fn list_files(dir: &Path) -> Result<Vec<FileEntry>, CollectError> {
    let unavailable = |source: std::io::Error| {
        tracing::error!(dir = %dir.display(), error = %source, "Cannot list log directory");
        CollectError::DirectoryUnavailable {
            dir: dir.to_path_buf(),
            source,
        }
    };

    let mut read_dir = tokio::fs::read_dir(dir).await.map_err(unavailable)?;
    let mut entries = Vec::new();

    while let Some(entry) = read_dir.next_entry().await.map_err(unavailable)? {
        let path = entry.path();
        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable directory entry");
                continue;
            }
        };
        if meta.is_dir() {
            continue;
        }

        entries.push(FileEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            size: meta.len(),
            modified: meta.modified().unwrap_or(std::time::UNIX_EPOCH),
            path,
        });
    }

    Ok(entries)
}

fn read_entry(
    reader: ReverseLineReader,
    entry: FileEntry,
    limit: LineLimit,
    search: Option<&str>,
    cancel: &CancellationToken,
) -> FileOutcome {
    let mut file = match File::open(&entry.path) {
        Ok(file) => file,
        Err(e) => {
            tracing::warn!(path = %entry.path.display(), error = %e, "Cannot open log file");
            let reason = format!("open {}: {}", entry.path.display(), e);
            return FileOutcome::Done {
                content: FileContent::new(&entry, FileBody::Error(reason)),
                filtered: false,
            };
        }
    };

    let (body, filtered) = match reader.read(&mut file, limit, search, cancel) {
        Ok(ReadOutcome::Text { lines, filtered }) => (FileBody::Text(lines), filtered),
        Ok(ReadOutcome::Binary) => (FileBody::Binary, false),
        Err(ReadError::Cancelled) => return FileOutcome::Cancelled,
        Err(e) => {
            tracing::warn!(path = %entry.path.display(), error = %e, "Failed reading log file");
            let reason = format!("read {}: {}", entry.path.display(), e);
            (FileBody::Error(reason), false)
        }
    };

    FileOutcome::Done {
        content: FileContent::new(&entry, body),
        filtered,
    }
}

/// Entry reported for a file whose read task panicked or was aborted
fn task_failed(entry: &FileEntry, e: &tokio::task::JoinError) -> FileOutcome {
    let reason = format!("read {}: {}", entry.path.display(), e);
    FileOutcome::Done {
        content: FileContent::new(entry, FileBody::Error(reason)),
        filtered: false,
    }
}

/// With a search active, binary files and text files whose every non-blank
/// line was filtered out are dropped. Empty files and errors are kept.
fn keep_entry(content: &FileContent, filtered: bool, search_active: bool) -> bool {
    if !search_active {
        return true;
    }
    match &content.body {
        FileBody::Binary => false,
        FileBody::Text(lines) => !(lines.is_empty() && filtered),
        FileBody::Error(_) => true,
    }
}
