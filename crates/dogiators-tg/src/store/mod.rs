//! Shared accounts config: one JSON object keyed by the account name.
//!
//! The same file is used by every account worker and possibly by several
//! processes at once, so all writes go through the inter-process lock and
//! an atomic rename of a temporary file.
mod record;

pub(crate) use record::*;

use crate::error::ErrorClass;
use crate::prelude::*;
use crate::util::lock::InterProcessLock;
use crate::util::tokio::spawn_blocking;
use crate::{err, err_ctx, Result};
use serde_json::Value;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub(crate) type Document = serde_json::Map<String, Value>;

#[derive(Debug, Clone)]
pub(crate) struct Store {
    path: PathBuf,
    lock: InterProcessLock,
}

impl Store {
    pub(crate) fn new(path: impl Into<PathBuf>, lock_files: &Path) -> Self {
        Self {
            path: path.into(),
            lock: InterProcessLock::new(lock_files.join("accounts_config.lock")),
        }
    }

    #[cfg(test)]
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the whole document. Missing or empty file is an empty document.
    pub(crate) async fn read(&self) -> Result<Document> {
        if let Some(document) = self.read_existing().await? {
            return Ok(document);
        }

        warn!(
            path = %self.path.display(),
            "Accounts config doesn't exist, creating an empty one"
        );
        self.write(&Document::new()).await;

        Ok(Document::new())
    }

    /// Same as [`Self::read()`], but doesn't create the missing file, so it
    /// is safe to call while the lock is held.
    async fn read_existing(&self) -> Result<Option<Document>> {
        let content = match fs_err::tokio::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(err!(StoreError::Read {
                    path: &self.path,
                    source
                }))
            }
        };

        parse_document(&self.path, &content).map(Some)
    }

    /// Replaces the whole document. Failures are only logged, the caller
    /// proceeds with its in-memory state.
    pub(crate) async fn write(&self, document: &Document) {
        if let Err(err) = self.try_write(document).await {
            warn!(err = tracing_err(&err), "Failed to write the accounts config");
        }
    }

    pub(crate) async fn try_write(&self, document: &Document) -> Result {
        let _guard = self.lock().await?;
        self.write_unlocked(document).await
    }

    /// Returns the record of the account or `None` if there is no such account.
    pub(crate) async fn get(&self, account: &str) -> Result<Option<AccountRecord>> {
        let document = self.read().await?;
        document
            .get(account)
            .map(|value| parse_record(account, value.clone()))
            .transpose()
    }

    /// Replaces the record of the account keeping the records of the other
    /// accounts intact. Failures are only logged.
    pub(crate) async fn update(&self, account: &str, record: &AccountRecord) {
        if let Err(err) = self.try_update(account, record).await {
            warn!(
                account,
                err = tracing_err(&err),
                "Failed to update the account record"
            );
        }
    }

    pub(crate) async fn try_update(&self, account: &str, record: &AccountRecord) -> Result {
        let value =
            serde_json::to_value(record).map_err(err_ctx!(StoreError::Serialize { account }))?;

        self.modify(|document| {
            document.insert(account.to_owned(), value);
        })
        .await
    }

    /// Rewrites the records that use the legacy flat layout. The file is
    /// touched only when at least one record was actually migrated.
    pub(crate) async fn migrate_legacy_records(&self) -> Result<usize> {
        let _guard = self.lock().await?;

        let Some(mut document) = self.read_existing().await? else {
            return Ok(0);
        };

        let migrated = document
            .iter_mut()
            .filter_map(|(account, record)| migrate_legacy_record(record).then_some(account))
            .inspect(|account| info!(account = %account, "Migrated legacy account record"))
            .count();

        if migrated > 0 {
            self.write_unlocked(&document).await?;
        }

        Ok(migrated)
    }

    /// Read-modify-write cycle under the lock, so that concurrent updates of
    /// different accounts don't overwrite each other.
    async fn modify(&self, modify: impl FnOnce(&mut Document)) -> Result {
        let _guard = self.lock().await?;
        let mut document = self.read_existing().await?.unwrap_or_default();
        modify(&mut document);
        self.write_unlocked(&document).await
    }

    async fn lock(&self) -> Result<crate::util::lock::InterProcessLockGuard> {
        self.lock.acquire().await.map_err(err_ctx!(StoreError::Lock {
            path: self.lock.path()
        }))
    }

    async fn write_unlocked(&self, document: &Document) -> Result {
        let path = self.path.clone();
        let document = document.clone();

        spawn_blocking(move || write_atomically(&path, &document))
            .await
            .map_err(err_ctx!(StoreError::Write { path: &self.path }))
    }
}

fn parse_document(path: &Path, content: &str) -> Result<Document> {
    if content.trim().is_empty() {
        return Ok(Document::new());
    }

    let value: Value = serde_json::from_str(content)
        .map_err(err_ctx!(StoreError::InvalidDocument { path }))?;

    match value {
        Value::Object(document) => Ok(document),
        _ => Err(err!(StoreError::NotAnObject { path })),
    }
}

fn parse_record(account: &str, value: Value) -> Result<AccountRecord> {
    serde_json::from_value(value).map_err(err_ctx!(StoreError::CorruptedRecord { account }))
}

fn write_atomically(path: &Path, document: &Document) -> io::Result<()> {
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    fs_err::create_dir_all(dir)?;

    // The temp file must live on the same file system for the rename to be atomic
    let mut file = tempfile::NamedTempFile::new_in(dir)?;

    serde_json::to_writer_pretty(&mut file, document)?;
    file.write_all(b"\n")?;
    file.as_file().sync_all()?;

    file.persist(path).map_err(|err| err.error)?;

    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum StoreError {
    #[error("Failed to read the accounts config at {path}")]
    Read { path: PathBuf, source: io::Error },

    #[error("Failed to write the accounts config at {path}")]
    Write { path: PathBuf, source: io::Error },

    #[error("Failed to take the accounts config lock at {path}")]
    Lock { path: PathBuf, source: io::Error },

    #[error("Accounts config at {path} is not valid JSON")]
    InvalidDocument {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Accounts config at {path} must contain a JSON object")]
    NotAnObject { path: PathBuf },

    #[error("Record of the account `{account}` is corrupted")]
    CorruptedRecord {
        account: String,
        source: serde_json::Error,
    },

    #[error("Failed to serialize the record of the account `{account}`")]
    Serialize {
        account: String,
        source: serde_json::Error,
    },
}

impl StoreError {
    pub(crate) fn class(&self) -> ErrorClass {
        match self {
            Self::Read { .. } | Self::Write { .. } | Self::Lock { .. } => ErrorClass::Transient,
            Self::InvalidDocument { .. }
            | Self::NotAnObject { .. }
            | Self::CorruptedRecord { .. }
            | Self::Serialize { .. } => ErrorClass::Config,
        }
    }
}
