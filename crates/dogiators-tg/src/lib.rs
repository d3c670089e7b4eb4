mod config;
mod error;
mod game;
mod http;
mod launcher;
mod observability;
mod proxy;
mod store;
mod tapper;
mod tg;

pub mod util;

pub use crate::error::*;
pub use config::*;
pub use observability::*;

#[allow(unused_imports)]
mod prelude {
    pub(crate) use crate::error::prelude::*;
    pub(crate) use crate::http::prelude::*;
    pub(crate) use crate::observability::logging::prelude::*;
    pub(crate) use crate::util::prelude::*;
}

/// Run the farm: prepare every discovered account and drive their workers
/// until all of them hit a terminal condition.
pub async fn run(config: Config) -> Result<()> {
    launcher::run(config).await
}
