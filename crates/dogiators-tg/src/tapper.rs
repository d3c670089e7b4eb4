//! Worker that drives one account through the game's task cycles.
use crate::error::ErrorClass;
use crate::game::{self, GameApi, Profile, SubscriptionQuest, TapsUpdate};
use crate::prelude::*;
use crate::proxy::{Proxy, ProxyProbe};
use crate::store::Store;
use crate::tg::{TelegramAccount, WebSession, FLOOD_WAIT_MARGIN};
use crate::util::jitter;
use crate::Result;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Pause after a failure to reach the proxy, Telegram or the game profile
const BACKOFF_DELAY: Duration = Duration::from_secs(5 * 60);

/// Quests that need something the worker can't do
const SKIPPED_QUESTS: &[&str] = &[
    "verify:ton_wallet_verify",
    "verify:ton_transaction_completed",
    "perform:single_fight",
];

const TELEGRAM_CHANNEL_QUEST: &str = "subscribe:telegram";

const TAPS_TOTAL: &str = "dogiators_taps_total";
const SPINS_TOTAL: &str = "dogiators_wheel_spins_total";
const QUESTS_TOTAL: &str = "dogiators_quests_claimed_total";
const UPGRADES_TOTAL: &str = "dogiators_upgrades_bought_total";
const CYCLES_TOTAL: &str = "dogiators_cycles_total";

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum BackoffReason {
    ProxyUnreachable,
    NoWebSession,
    NoProfile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CycleOutcome {
    Completed { next_in: Duration },
    Backoff { reason: BackoffReason, delay: Duration },
}

struct Token {
    session: WebSession,
    acquired_at: Instant,
}

/// Everything the worker needs to serve its account
pub(crate) struct TapperParams {
    pub(crate) account: String,
    pub(crate) config: game::Config,
    pub(crate) telegram: Box<dyn TelegramAccount>,
    pub(crate) game: Box<dyn GameApi>,
    pub(crate) probe: Arc<dyn ProxyProbe>,
    pub(crate) proxy: Option<Proxy>,
    pub(crate) store: Store,
    pub(crate) first_run: bool,
}

pub(crate) struct Tapper {
    account: String,
    config: game::Config,
    telegram: Box<dyn TelegramAccount>,
    game: Box<dyn GameApi>,
    probe: Arc<dyn ProxyProbe>,
    proxy: Option<Proxy>,
    store: Store,
    first_run: bool,
    token: Option<Token>,
}

impl Tapper {
    pub(crate) fn new(params: TapperParams) -> Self {
        let TapperParams {
            account,
            config,
            telegram,
            game,
            probe,
            proxy,
            store,
            first_run,
        } = params;

        Self {
            account,
            config,
            telegram,
            game,
            probe,
            proxy,
            store,
            first_run,
            token: None,
        }
    }

    /// Runs the cycles until the account hits a condition that retrying
    /// can't fix. That condition is returned as an error.
    pub(crate) async fn run(mut self) -> Result {
        let start_delay = jitter::uniform_secs(1.0, self.config.session_start_delay as f64);
        info!(delay = tracing_duration(start_delay), "Worker will start after a delay");
        tokio::time::sleep(start_delay).await;

        let time_zone = self.game.time_zone().await;
        debug!(%time_zone, "Resolved the time zone");

        loop {
            let delay = match self.run_cycle(&time_zone).await {
                Ok(CycleOutcome::Completed { next_in }) => {
                    metrics::increment_counter!(CYCLES_TOTAL, "outcome" => "completed");
                    info!(sleep = tracing_duration(next_in), "Completed the cycle");
                    next_in
                }
                Ok(CycleOutcome::Backoff { reason, delay }) => {
                    metrics::increment_counter!(CYCLES_TOTAL, "outcome" => reason.to_string());
                    warn!(%reason, sleep = tracing_duration(delay), "Backing off");
                    delay
                }
                Err(err) => match err.class() {
                    ErrorClass::Terminal => {
                        metrics::increment_counter!(CYCLES_TOTAL, "outcome" => "stopped");
                        error!(err = tracing_err(&err), "Stopping the worker");
                        return Err(err);
                    }
                    ErrorClass::RateLimited { retry_after } => {
                        let delay = retry_after + FLOOD_WAIT_MARGIN;
                        warn!(sleep = tracing_duration(delay), "Rate limited");
                        delay
                    }
                    ErrorClass::Config => {
                        metrics::increment_counter!(CYCLES_TOTAL, "outcome" => "error");
                        let delay = jitter::uniform_secs(60.0, 120.0);
                        error!(
                            err = tracing_err(&err),
                            sleep = tracing_duration(delay),
                            "Configuration error during the cycle"
                        );
                        delay
                    }
                    ErrorClass::Transient => {
                        metrics::increment_counter!(CYCLES_TOTAL, "outcome" => "error");
                        let delay = jitter::uniform_secs(60.0, 120.0);
                        warn!(
                            err = tracing_err(&err),
                            sleep = tracing_duration(delay),
                            "Unknown error during the cycle"
                        );
                        delay
                    }
                },
            };

            tokio::time::sleep(delay).await;
        }
    }

    pub(crate) async fn run_cycle(&mut self, time_zone: &str) -> Result<CycleOutcome> {
        let backoff = |reason| {
            Ok(CycleOutcome::Backoff {
                reason,
                delay: BACKOFF_DELAY,
            })
        };

        if let Some(proxy) = &self.proxy {
            if !self.probe.is_alive(proxy).await {
                return backoff(BackoffReason::ProxyUnreachable);
            }
        } else {
            debug!("Running without a proxy");
        }

        let Some(session) = self.web_session().await? else {
            return backoff(BackoffReason::NoWebSession);
        };

        jitter::sleep_uniform(1.0, 3.0).await;

        let profile = match self.game.init_profile(&session, time_zone).await {
            Ok(profile) => profile,
            Err(err) => {
                warn!(err = tracing_err(&err), "Failed to get the profile");
                return backoff(BackoffReason::NoProfile);
            }
        };

        if self.first_run {
            self.mark_first_run_done().await;
        }

        log_profile(&profile);

        self.perform_tasks(&session, profile).await?;

        if self.config.upgrade_cards {
            self.buy_upgrades(&session, time_zone).await;
        }

        Ok(CycleOutcome::Completed {
            next_in: self.config.random_sleep_time.sample(),
        })
    }

    /// Returns the cached web session or acquires a new one once the cached
    /// one outlived a randomized lifetime.
    async fn web_session(&mut self) -> Result<Option<WebSession>> {
        let lifetime = jitter::uniform_secs(3500.0, 3600.0);

        if let Some(token) = &self.token {
            if token.acquired_at.elapsed() < lifetime {
                return Ok(Some(token.session.clone()));
            }
        }

        let Some(session) = self
            .telegram
            .acquire_web_session(self.first_run)
            .with_duration_log("Acquiring the web session")
            .await?
        else {
            warn!("Failed to get the web view session");
            return Ok(None);
        };

        self.token = Some(Token {
            session: session.clone(),
            acquired_at: Instant::now(),
        });

        Ok(Some(session))
    }

    async fn mark_first_run_done(&mut self) {
        self.first_run = false;

        let record = match self.store.get(&self.account).await {
            Ok(record) => record.unwrap_or_default(),
            Err(err) => {
                warn!(err = tracing_err(&err), "Failed to read the account record");
                return;
            }
        };

        let record = crate::store::AccountRecord {
            first_run_done: true,
            ..record
        };

        self.store.update(&self.account, &record).await;
    }

    async fn perform_tasks(&mut self, session: &WebSession, mut profile: Profile) -> Result {
        if !profile.is_onboarded {
            match self.game.complete_onboarding(session).await {
                Ok(true) => info!("Completed the onboarding"),
                Ok(false) => warn!("The onboarding is still not completed"),
                Err(err) => warn!(err = tracing_err(&err), "Failed to complete the onboarding"),
            }
        }

        if self.config.auto_tap {
            if let Some(updated) = self.tap(session, &profile).await {
                profile = updated;
            }
        }

        if self.config.spin_the_wheel {
            for _ in 0..profile.lottery_tickets {
                jitter::sleep_uniform(2.0, 5.0).await;

                match self.game.spin_wheel(session).await {
                    Ok(prize) => {
                        metrics::increment_counter!(SPINS_TOTAL);
                        info!(value = %prize.value, kind = %prize.kind, "Spun the wheel");
                    }
                    Err(err) => warn!(err = tracing_err(&err), "Failed to spin the wheel"),
                }
            }
        }

        if self.config.perform_quests {
            self.perform_quests(session).await?;
        }

        Ok(())
    }

    async fn tap(&self, session: &WebSession, profile: &Profile) -> Option<Profile> {
        let Some(taps) = plan_taps(profile) else {
            debug!(energy = profile.cur_energy, "Not enough energy to tap");
            return None;
        };

        jitter::sleep_uniform(5.0, 10.0).await;

        match self.game.send_taps(session, taps).await {
            Ok(profile) => {
                metrics::counter!(TAPS_TOTAL, taps.taps);
                info!(taps = taps.taps, profit = taps.profit, "Tapped");
                Some(profile)
            }
            Err(err) => {
                warn!(err = tracing_err(&err), "Failed to send the taps");
                None
            }
        }
    }

    async fn perform_quests(&mut self, session: &WebSession) -> Result {
        jitter::sleep_uniform(1.0, 3.0).await;

        let quests = match self.game.quests(session).await {
            Ok(quests) => quests,
            Err(err) => {
                warn!(err = tracing_err(&err), "Failed to get the quests");
                return Ok(());
            }
        };

        if let Some(day) = quests.claimable_daily_reward() {
            jitter::sleep_uniform(2.0, 5.0).await;

            match self.game.claim_daily_reward(session).await {
                Ok(()) => {
                    metrics::increment_counter!(QUESTS_TOTAL, "kind" => "daily_reward");
                    info!(reward = %day.value, "Claimed the daily reward");
                }
                Err(err) => warn!(err = tracing_err(&err), "Failed to claim the daily reward"),
            }
        }

        for quest in quests.subscriptions_state.iter().filter(|quest| !quest.is_completed) {
            self.perform_subscription_quest(session, quest).await?;
        }

        Ok(())
    }

    async fn perform_subscription_quest(
        &mut self,
        session: &WebSession,
        quest: &SubscriptionQuest,
    ) -> Result {
        let kind = quest.kind.as_str();

        if SKIPPED_QUESTS.contains(&kind) {
            return Ok(());
        }

        if kind == TELEGRAM_CHANNEL_QUEST {
            if !self.config.channel_subscribe_tasks {
                return Ok(());
            }

            if let Some(link) = &quest.link {
                match self.telegram.join_channel(link).await {
                    Ok(()) => {}
                    Err(err) if err.is_terminal() => return Err(err),
                    Err(err) => warn!(err = tracing_err(&err), link, "Failed to join the channel"),
                }
            }
        }

        jitter::sleep_uniform(2.0, 5.0).await;

        match self.game.claim_subscription(session, kind).await {
            Ok(reward) => match reward.profit {
                Some(profit) if profit > 0.0 => {
                    metrics::increment_counter!(QUESTS_TOTAL, "kind" => "subscription");
                    info!(quest = kind, profit, "Completed the quest");
                }
                _ => debug!(quest = kind, "The quest brought no profit"),
            },
            Err(err) => warn!(quest = kind, err = tracing_err(&err), "Failed to claim the quest"),
        }

        Ok(())
    }

    /// Buys the best upgrade one by one while there is something worth buying
    async fn buy_upgrades(&self, session: &WebSession, time_zone: &str) {
        loop {
            let profile = match self.game.init_profile(session, time_zone).await {
                Ok(profile) => profile,
                Err(err) => {
                    warn!(err = tracing_err(&err), "Failed to refresh the profile");
                    return;
                }
            };

            jitter::sleep_uniform(2.0, 5.0).await;

            let catalog = match self.game.upgrades(session).await {
                Ok(catalog) if !catalog.is_empty() => catalog,
                Ok(_) => return,
                Err(err) => {
                    warn!(err = tracing_err(&err), "Failed to get the upgrades");
                    return;
                }
            };

            let Some(upgrade) = game::select_best_upgrade(&catalog, &profile) else {
                debug!(balance = profile.balance, "No upgrade is worth buying");
                return;
            };

            jitter::sleep_uniform(1.0, 3.0).await;

            if let Err(err) = self.game.buy_upgrade(session, upgrade.id).await {
                warn!(
                    upgrade = %upgrade.describe(),
                    err = tracing_err(&err),
                    "Failed to buy the upgrade"
                );
                return;
            }

            metrics::increment_counter!(UPGRADES_TOTAL);
            info!(upgrade = %upgrade.describe(), "Bought the upgrade");
        }
    }
}

fn log_profile(profile: &Profile) {
    info!(
        balance = profile.balance as i64,
        level = profile.level,
        profit_per_hour = profile.profit_per_hour,
        spins = profile.lottery_tickets,
        "Profile"
    );
}

/// Taps a bit less than the energy allows, the way a human would.
fn plan_taps(profile: &Profile) -> Option<TapsUpdate> {
    let energy = profile.cur_energy.max(0.0) as u64;
    let profit_per_tap = profile.profit_per_tap();

    let mut rng = rand::thread_rng();

    let taps = (energy as f64 / profit_per_tap as f64 * rng.gen_range(0.75..0.85)) as u64;
    if taps == 0 {
        return None;
    }

    let profit = (energy - energy % profit_per_tap).saturating_sub(rng.gen_range(1..=20) * 10);

    Some(TapsUpdate {
        taps,
        profit,
        timestamp: chrono::Utc::now().timestamp(),
    })
}
