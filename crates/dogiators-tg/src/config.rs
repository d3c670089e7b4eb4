use crate::{game, proxy, tg};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub struct Config {
    pub(crate) tg: tg::Config,
    pub(crate) game: game::Config,
    pub(crate) proxy: proxy::Config,
    pub(crate) paths: Paths,
}

impl Config {
    pub fn load_or_panic() -> Config {
        let paths: PathsConfig = from_env_or_panic("");
        Self {
            tg: from_env_or_panic(""),
            game: from_env_or_panic(""),
            proxy: from_env_or_panic(""),
            paths: Paths::resolve(&paths.global_config_path, |var| std::env::var(var).ok()),
        }
    }
}

#[derive(Deserialize)]
struct PathsConfig {
    /// Either a directory path or the name of an environment variable that
    /// holds the directory path.
    #[serde(default = "default_global_config_path")]
    global_config_path: String,
}

fn default_global_config_path() -> String {
    "TG_FARM".to_owned()
}

/// Locations of the files shared between all account workers
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Paths {
    pub(crate) accounts_config: PathBuf,
    pub(crate) sessions: PathBuf,
    pub(crate) proxies: PathBuf,
    /// Only the global config directory carries the proxy chain
    pub(crate) proxy_chain: Option<PathBuf>,
}

impl Paths {
    pub(crate) fn resolve(global: &str, env: impl Fn(&str) -> Option<String>) -> Self {
        let global_dir = Some(PathBuf::from(global))
            .filter(|path| path.is_dir())
            .or_else(|| env(global).map(PathBuf::from).filter(|path| path.is_dir()));

        match global_dir {
            Some(dir) => Self::in_dir(&dir),
            None => Self {
                accounts_config: PathBuf::from("bot/config/accounts_config.json"),
                sessions: PathBuf::from("sessions"),
                proxies: PathBuf::from("bot/config/proxies.txt"),
                proxy_chain: None,
            },
        }
    }

    pub(crate) fn in_dir(dir: &Path) -> Self {
        Self {
            accounts_config: dir.join("accounts_config.json"),
            sessions: dir.join("sessions"),
            proxies: dir.join("proxies.txt"),
            proxy_chain: Some(dir.join("proxy_chain.txt")),
        }
    }

    /// Directory where the inter-process lock files are kept
    pub(crate) fn lock_files(&self) -> PathBuf {
        self.accounts_config
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("lock_files")
    }
}

/// Inclusive range of seconds, parsed from `min,max` or `[min, max]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SecsRange {
    pub(crate) min: u64,
    pub(crate) max: u64,
}

impl SecsRange {
    pub(crate) const fn new(min: u64, max: u64) -> Self {
        Self { min, max }
    }

    pub(crate) fn sample(self) -> Duration {
        crate::util::jitter::uniform_secs(self.min as f64, self.max as f64)
    }
}

impl FromStr for SecsRange {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim().trim_start_matches('[').trim_end_matches(']');

        let (min, max) = trimmed
            .split_once(',')
            .ok_or_else(|| format!("expected `min,max` seconds range, got `{input}`"))?;

        let parse = |value: &str| {
            value
                .trim()
                .parse::<u64>()
                .map_err(|err| format!("invalid seconds value `{value}`: {err}"))
        };

        let (min, max) = (parse(min)?, parse(max)?);

        if min > max {
            return Err(format!("range start {min} is greater than its end {max}"));
        }

        Ok(Self { min, max })
    }
}

impl fmt::Display for SecsRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.min, self.max)
    }
}

pub(crate) fn from_env_or_panic<T: DeserializeOwned>(prefix: &str) -> T {
    envy::prefixed(prefix).from_env().unwrap_or_else(|err| {
        panic!(
            "BUG: Couldn't load config from environment for {}: {:#?}",
            std::any::type_name::<T>(),
            err
        );
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use expect_test::expect;

    #[test]
    fn secs_range_parsing() {
        let test = |input: &str| match input.parse::<SecsRange>() {
            Ok(range) => format!("{range:?}"),
            Err(err) => format!("Err: {err}"),
        };

        expect!["SecsRange { min: 3600, max: 10800 }"].assert_eq(&test("3600,10800"));
        expect!["SecsRange { min: 3600, max: 10800 }"].assert_eq(&test("[3600, 10800]"));
        expect!["Err: range start 10 is greater than its end 5"].assert_eq(&test("10,5"));
        expect!["Err: expected `min,max` seconds range, got `42`"].assert_eq(&test("42"));
    }

    #[test]
    fn paths_fall_back_to_local_layout() {
        let paths = Paths::resolve("/definitely/not/a/dir", |_| None);

        assert_eq!(
            paths.accounts_config,
            PathBuf::from("bot/config/accounts_config.json")
        );
        assert_eq!(paths.lock_files(), PathBuf::from("bot/config/lock_files"));
        assert_eq!(paths.proxy_chain, None);
    }

    #[test]
    fn paths_resolve_global_dir_through_env_var() {
        let dir = tempfile::tempdir().unwrap();
        let dir_str = dir.path().to_str().unwrap().to_owned();

        let paths = Paths::resolve("TG_FARM", |var| (var == "TG_FARM").then(|| dir_str.clone()));

        assert_eq!(paths, Paths::in_dir(dir.path()));
        assert_eq!(paths.lock_files(), dir.path().join("lock_files"));
        assert_eq!(paths.proxy_chain, Some(dir.path().join("proxy_chain.txt")));
    }
}
