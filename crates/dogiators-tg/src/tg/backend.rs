//! Session file formats.
//!
//! Session files come from different tools. The native `grammers` format is
//! read and written as is, while SQLite session files (as written by Telethon
//! and Pyrogram) are only read: the auth key and the home DC are extracted
//! from them and the connection goes on with an in-memory session.
use super::TgError;
use crate::prelude::*;
use crate::{err, err_ctx, Result};
use async_trait::async_trait;
use grammers_session::Session;
use sqlx::{Connection, Row};
use std::io::Read;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const SQLITE_HEADER: &[u8; 16] = b"SQLite format 3\0";

/// Production DC addresses, the same ones the official clients start with.
const DC_ADDRESSES: &[(i32, Ipv4Addr)] = &[
    (1, Ipv4Addr::new(149, 154, 175, 53)),
    (2, Ipv4Addr::new(149, 154, 167, 51)),
    (3, Ipv4Addr::new(149, 154, 175, 100)),
    (4, Ipv4Addr::new(149, 154, 167, 91)),
    (5, Ipv4Addr::new(91, 108, 56, 130)),
];

const DC_PORT: u16 = 443;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum SessionBackendKind {
    Native,
    Sqlite,
}

#[async_trait]
pub(crate) trait SessionBackend: Send + Sync {
    fn kind(&self) -> SessionBackendKind;

    fn path(&self) -> &Path;

    async fn load(&self) -> Result<Session>;

    /// Persists the state the session accumulated while it was connected.
    async fn save(&self, session: &Session) -> Result;
}

/// Looks at the file header to tell which backend can read the session file.
pub(crate) fn detect_backend_kind(path: &Path) -> std::io::Result<SessionBackendKind> {
    let mut header = [0; SQLITE_HEADER.len()];

    let mut file = fs_err::File::open(path)?;
    let read = file.read(&mut header)?;

    if read == header.len() && &header == SQLITE_HEADER {
        return Ok(SessionBackendKind::Sqlite);
    }

    Ok(SessionBackendKind::Native)
}

/// Negotiates the backend for the session file once, at startup.
pub(crate) fn open_backend(path: &Path) -> Result<Arc<dyn SessionBackend>> {
    let kind = detect_backend_kind(path).map_err(err_ctx!(TgError::LoadSession { path }))?;

    let backend: Arc<dyn SessionBackend> = match kind {
        SessionBackendKind::Native => Arc::new(NativeSessionFile { path: path.into() }),
        SessionBackendKind::Sqlite => Arc::new(SqliteSessionFile { path: path.into() }),
    };

    Ok(backend)
}

pub(crate) struct NativeSessionFile {
    path: PathBuf,
}

#[async_trait]
impl SessionBackend for NativeSessionFile {
    fn kind(&self) -> SessionBackendKind {
        SessionBackendKind::Native
    }

    fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Session> {
        Session::load_file(&self.path).map_err(err_ctx!(TgError::LoadSession { path: &self.path }))
    }

    async fn save(&self, session: &Session) -> Result {
        session
            .save_to_file(&self.path)
            .map_err(err_ctx!(TgError::SaveSession { path: &self.path }))
    }
}

pub(crate) struct SqliteSessionFile {
    path: PathBuf,
}

/// The part of a SQLite session file needed to resume it
#[derive(Debug)]
struct SqliteSessionRow {
    dc_id: i32,
    auth_key: [u8; 256],
    user_id: Option<i64>,
    is_bot: bool,
}

impl SqliteSessionFile {
    async fn read_row(&self) -> Result<SqliteSessionRow> {
        let sqlite_err = err_ctx!(TgError::SqliteSession { path: &self.path });

        let options = sqlx::sqlite::SqliteConnectOptions::new()
            .filename(&self.path)
            .read_only(true);

        let mut connection = sqlx::SqliteConnection::connect_with(&options)
            .await
            .map_err(sqlite_err)?;

        // Both Telethon and Pyrogram use the `sessions` table, but only
        // Pyrogram stores the user there.
        let row = sqlx::query("SELECT * FROM sessions LIMIT 1")
            .fetch_optional(&mut connection)
            .await
            .map_err(err_ctx!(TgError::SqliteSession { path: &self.path }))?;

        if let Err(err) = connection.close().await {
            debug!(err = tracing_err(&err), "Failed to close the SQLite session file");
        }

        let row = row.ok_or_else(|| err!(TgError::EmptySession { path: &self.path }))?;

        let dc_id: i64 = row
            .try_get("dc_id")
            .map_err(err_ctx!(TgError::SqliteSession { path: &self.path }))?;

        let auth_key: Vec<u8> = row
            .try_get::<Option<Vec<u8>>, _>("auth_key")
            .map_err(err_ctx!(TgError::SqliteSession { path: &self.path }))?
            .unwrap_or_default();

        let auth_key = <[u8; 256]>::try_from(auth_key.as_slice())
            .map_err(|_| err!(TgError::EmptySession { path: &self.path }))?;

        let user_id = row.try_get::<Option<i64>, _>("user_id").ok().flatten();
        let is_bot = row
            .try_get::<Option<bool>, _>("is_bot")
            .ok()
            .flatten()
            .unwrap_or(false);

        Ok(SqliteSessionRow {
            dc_id: i32::try_from(dc_id).unwrap_or(0),
            auth_key,
            user_id,
            is_bot,
        })
    }
}

#[async_trait]
impl SessionBackend for SqliteSessionFile {
    fn kind(&self) -> SessionBackendKind {
        SessionBackendKind::Sqlite
    }

    fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Session> {
        let row = self.read_row().await?;

        let addr = dc_address(row.dc_id).ok_or_else(|| {
            err!(TgError::EmptySession { path: &self.path })
        })?;

        let session = Session::new();
        session.insert_dc(row.dc_id, addr, row.auth_key);

        // The user id is only used to pick the home DC, so the zero id is
        // fine for the files that don't store it.
        session.set_user(row.user_id.unwrap_or(0), row.dc_id, row.is_bot);

        Ok(session)
    }

    async fn save(&self, _session: &Session) -> Result {
        // The auth key never changes, so there is nothing worth writing back
        Ok(())
    }
}

fn dc_address(dc_id: i32) -> Option<SocketAddr> {
    DC_ADDRESSES
        .iter()
        .find(|(id, _)| *id == dc_id)
        .map(|(_, ip)| SocketAddr::V4(SocketAddrV4::new(*ip, DC_PORT)))
}
