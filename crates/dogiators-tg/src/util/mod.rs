//! Assorted utility functions (missing batteries).
mod std_ext;

pub mod jitter;
pub mod lock;
pub mod tokio;

pub(crate) use std_ext::*;

pub(crate) mod prelude {
    pub(crate) use super::std_ext::prelude::*;
}

pub(crate) type DynError = dyn std::error::Error + Send + Sync;
