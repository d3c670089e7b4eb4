//! The Dogiators mini app: its REST API and the decisions made on top of it.
mod api;
mod headers;
mod upgrade;

pub(crate) use api::*;
pub(crate) use headers::*;
pub(crate) use upgrade::*;

use crate::config::SecsRange;
use crate::error::ErrorClass;
use serde::Deserialize;
use serde_with::{serde_as, DisplayFromStr};

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Config {
    /// Referral code sent with the first web view request of the account
    #[serde(default = "default_ref_id")]
    pub(crate) ref_id: String,

    #[serde(default = "default_true")]
    pub(crate) perform_quests: bool,

    #[serde(default = "default_true")]
    pub(crate) channel_subscribe_tasks: bool,

    #[serde(default = "default_true")]
    pub(crate) upgrade_cards: bool,

    #[serde(default = "default_true")]
    pub(crate) spin_the_wheel: bool,

    #[serde(default = "default_true")]
    pub(crate) auto_tap: bool,

    /// Pause between the task cycles of the account
    #[serde_as(as = "DisplayFromStr")]
    #[serde(default = "default_random_sleep_time")]
    pub(crate) random_sleep_time: SecsRange,

    /// Upper bound of the random delay before the account's worker starts, in seconds
    #[serde(default = "default_session_start_delay", alias = "random_session_start_delay")]
    pub(crate) session_start_delay: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ref_id: default_ref_id(),
            perform_quests: true,
            channel_subscribe_tasks: true,
            upgrade_cards: true,
            spin_the_wheel: true,
            auto_tap: true,
            random_sleep_time: default_random_sleep_time(),
            session_start_delay: default_session_start_delay(),
        }
    }
}

fn default_ref_id() -> String {
    crate::tg::FALLBACK_REF_ID.to_owned()
}

fn default_true() -> bool {
    true
}

fn default_random_sleep_time() -> SecsRange {
    SecsRange::new(3600, 10800)
}

fn default_session_start_delay() -> u64 {
    30
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum GameApiError {
    #[error("Game API rejected the request to {endpoint}")]
    Rejected { endpoint: &'static str },

    #[error("Game API response from {endpoint} has no profile")]
    MissingProfile { endpoint: &'static str },

    #[error("User agent can't be used as an HTTP header value: {user_agent}")]
    InvalidUserAgent {
        user_agent: String,
        source: reqwest::header::InvalidHeaderValue,
    },
}

impl GameApiError {
    pub(crate) fn class(&self) -> ErrorClass {
        match self {
            Self::Rejected { .. } | Self::MissingProfile { .. } => ErrorClass::Transient,
            Self::InvalidUserAgent { .. } => ErrorClass::Config,
        }
    }
}
