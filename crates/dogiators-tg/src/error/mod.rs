mod ext;
mod macros;

use crate::prelude::*;
use crate::util::DynError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing_error::SpanTrace;

pub(crate) use macros::*;

pub(crate) mod prelude {
    pub(crate) use super::ext::{OptionExt as _, ResultExt as _};
}

pub type Result<T = (), E = Error> = std::result::Result<T, E>;

/// Describes any possible error that may happen in the application lifetime.
#[derive(Clone)]
pub struct Error {
    imp: Arc<ErrorImp>,
}

struct ErrorImp {
    /// Small identifier used for debugging purposes.
    /// It is mentioned in the log line that reports the error, so that all
    /// the traces related to it can be looked up by this id.
    id: String,
    kind: ErrorKind,

    // Participates only in debug impl
    spantrace: SpanTrace,
}

#[derive(Error, Debug)]
pub(crate) enum ErrorKind {
    #[error(transparent)]
    HttpClient {
        #[from]
        source: crate::http::HttpClientError,
    },

    #[error(transparent)]
    Game {
        #[from]
        source: crate::game::GameApiError,
    },

    #[error(transparent)]
    Tg {
        #[from]
        source: crate::tg::TgError,
    },

    #[error(transparent)]
    Store {
        #[from]
        source: crate::store::StoreError,
    },

    #[error(transparent)]
    Proxy {
        #[from]
        source: crate::proxy::ProxyError,
    },

    #[error(transparent)]
    Io {
        #[from]
        source: IoError,
    },

    /// Unrecoverable kind of error, that is not supposed to happen, but when
    /// it happens we can't do anything reasonable about it, so no structural
    /// error handling is possible, this error is just propagated to the top.
    #[error("FATAL: {message}")]
    Fatal {
        message: String,
        source: Option<Box<DynError>>,
    },
}

impl From<std::io::Error> for ErrorKind {
    fn from(err: std::io::Error) -> Self {
        Self::Io { source: err.into() }
    }
}

#[derive(Debug, Error)]
pub(crate) enum IoError {
    #[error(transparent)]
    Other {
        #[from]
        source: std::io::Error,
    },
}

/// Coarse classification of errors that tells the account worker how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorClass {
    /// Network hiccups, bad API responses and anything else worth retrying
    /// after a generic backoff.
    Transient,

    /// The remote side asked us to slow down for the given amount of time.
    RateLimited { retry_after: Duration },

    /// The account can't be used anymore (banned or unauthorized).
    Terminal,

    /// Local configuration is broken. The worker keeps backing off until
    /// the user fixes it.
    Config,
}

impl Error {
    pub(crate) fn id(&self) -> &str {
        &self.imp.id
    }

    pub(crate) fn kind(&self) -> &ErrorKind {
        &self.imp.kind
    }

    pub(crate) fn class(&self) -> ErrorClass {
        match &self.imp.kind {
            ErrorKind::Tg { source } => source.class(),
            ErrorKind::Store { source } => source.class(),
            ErrorKind::Game { source } => source.class(),
            ErrorKind::Proxy { .. } => ErrorClass::Config,
            ErrorKind::HttpClient { .. }
            | ErrorKind::Io { .. }
            | ErrorKind::Fatal { .. } => ErrorClass::Transient,
        }
    }

    pub(crate) fn is_terminal(&self) -> bool {
        self.class() == ErrorClass::Terminal
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error (id: {}): {}", self.imp.id, self.imp.kind)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.imp.kind.source()
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)?;
        fmt::Display::fmt(&self.imp.spantrace, f)
    }
}

impl<T: Into<ErrorKind>> From<T> for Error {
    #[track_caller]
    fn from(kind: T) -> Self {
        let imp = ErrorImp {
            kind: kind.into(),
            id: nanoid::nanoid!(6),
            spantrace: SpanTrace::capture(),
        };

        let err = Self { imp: Arc::new(imp) };

        trace!(err = tracing_err(&err), "Created an error");

        err
    }
}
