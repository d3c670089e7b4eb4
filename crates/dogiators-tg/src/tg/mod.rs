//! Everything related to talking to Telegram as a user account.
mod backend;
mod device;
mod session;
mod user_agent;
mod webapp;

pub(crate) use backend::*;
pub(crate) use device::*;
pub(crate) use session::*;
pub(crate) use user_agent::*;
pub(crate) use webapp::*;

use crate::error::ErrorClass;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Deserialize)]
pub(crate) struct Config {
    pub(crate) api_id: i32,
    pub(crate) api_hash: String,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_id", &self.api_id)
            .field("api_hash", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum TgError {
    #[error("Telegram asked to wait for {seconds} seconds")]
    FloodWait { seconds: u64 },

    #[error("The session is unauthorized ({reason})")]
    Unauthorized { reason: String },

    #[error("The account is banned ({reason})")]
    Banned { reason: String },

    #[error("Telegram RPC call failed: {code} {name}")]
    Rpc { code: i32, name: String },

    #[error("Telegram request failed")]
    Invocation {
        source: grammers_mtsender::InvocationError,
    },

    #[error("Failed to connect to Telegram")]
    Connect {
        source: grammers_mtsender::AuthorizationError,
    },

    #[error("The session is not connected")]
    NotConnected,

    #[error("Failed to load the session file at {path}")]
    LoadSession {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to save the session file at {path}")]
    SaveSession {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to read the SQLite session file at {path}")]
    SqliteSession { path: PathBuf, source: sqlx::Error },

    #[error("The SQLite session file at {path} has no usable auth key")]
    EmptySession { path: PathBuf },

    #[error("Failed to take the session lock")]
    Lock { source: std::io::Error },

    #[error("Username `{username}` was not found")]
    UsernameNotFound { username: String },

    #[error("Unexpected result of the web view request: {result}")]
    UnexpectedWebViewResult { result: String },

    #[error("The web view URL doesn't contain the web app data")]
    MissingWebAppData,
}

impl TgError {
    pub(crate) fn class(&self) -> ErrorClass {
        match self {
            Self::FloodWait { seconds } => ErrorClass::RateLimited {
                retry_after: Duration::from_secs(*seconds),
            },
            Self::Unauthorized { .. } | Self::Banned { .. } | Self::EmptySession { .. } => {
                ErrorClass::Terminal
            }
            Self::LoadSession { .. } => ErrorClass::Config,
            Self::Rpc { .. }
            | Self::Invocation { .. }
            | Self::Connect { .. }
            | Self::NotConnected
            | Self::SaveSession { .. }
            | Self::SqliteSession { .. }
            | Self::Lock { .. }
            | Self::UsernameNotFound { .. }
            | Self::UnexpectedWebViewResult { .. }
            | Self::MissingWebAppData => ErrorClass::Transient,
        }
    }

    /// Maps the RPC error reported by Telegram to the error the account
    /// worker knows how to react to.
    pub(crate) fn from_rpc(code: i32, name: &str, value: Option<u32>) -> Self {
        match (name, value) {
            ("FLOOD_WAIT" | "FLOOD_PREMIUM_WAIT" | "SLOWMODE_WAIT", Some(seconds)) => {
                return Self::FloodWait {
                    seconds: seconds.into(),
                }
            }
            ("USER_DEACTIVATED" | "USER_DEACTIVATED_BAN" | "PHONE_NUMBER_BANNED", _) => {
                return Self::Banned {
                    reason: name.to_owned(),
                }
            }
            _ => {}
        }

        if code == 401 || matches!(name, "AUTH_KEY_UNREGISTERED" | "SESSION_REVOKED") {
            return Self::Unauthorized {
                reason: name.to_owned(),
            };
        }

        Self::Rpc {
            code,
            name: name.to_owned(),
        }
    }
}

impl From<grammers_mtsender::InvocationError> for TgError {
    fn from(err: grammers_mtsender::InvocationError) -> Self {
        match err {
            grammers_mtsender::InvocationError::Rpc(rpc) => {
                Self::from_rpc(rpc.code, &rpc.name, rpc.value)
            }
            source => Self::Invocation { source },
        }
    }
}
