//! Handshake that turns a Telegram session into a signed mini app session.
use super::{BotPeer, ChannelLink, ChannelPeer, TgError, TgSession};
use crate::error::ErrorClass;
use crate::prelude::*;
use crate::util::jitter;
use crate::util::lock::InterProcessLock;
use crate::{err, Result};
use async_trait::async_trait;
use std::time::Duration;
use url::form_urlencoded;

pub(crate) const BOT_USERNAME: &str = "Dogiators_bot";
pub(crate) const APP_SHORT_NAME: &str = "game";

/// Referral code used on the first run when the configured one isn't picked
pub(crate) const FALLBACK_REF_ID: &str = "s5XexnShM18Ftejz";

/// Probability to use the configured referral code on the first run
const REF_ID_PROBABILITY: f64 = 0.85;

/// Joined channels stay silent for about a year
const CHANNEL_MUTE_DAYS: i64 = 365;

/// Extra time to wait on top of the flood wait requested by Telegram
pub(crate) const FLOOD_WAIT_MARGIN: Duration = Duration::from_secs(3);

/// Pause after disconnecting, before the lock is given to another worker
const DISCONNECT_COOLDOWN: Duration = Duration::from_secs(15);

const UNKNOWN_ERROR_DELAY: Duration = Duration::from_secs(3);

/// Signed mini app session obtained from the web view URL.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct WebSession {
    /// Decoded `tgWebAppData`. It is sent to the game API verbatim.
    init_data: String,
    start_param: Option<String>,
    user: Option<serde_json::Value>,
}

impl WebSession {
    pub(crate) fn from_web_view_url(web_view_url: &str) -> Result<Self> {
        let fragment = web_view_url
            .split_once('#')
            .map(|(_, fragment)| fragment)
            .ok_or_else(|| err!(TgError::MissingWebAppData))?;

        let init_data = form_urlencoded::parse(fragment.as_bytes())
            .find(|(key, _)| key == "tgWebAppData")
            .map(|(_, value)| value.into_owned())
            .filter(|init_data| !init_data.is_empty())
            .ok_or_else(|| err!(TgError::MissingWebAppData))?;

        Ok(Self::from_init_data(init_data))
    }

    pub(crate) fn from_init_data(init_data: String) -> Self {
        let mut start_param = None;
        let mut user = None;

        for (key, value) in form_urlencoded::parse(init_data.as_bytes()) {
            match key.as_ref() {
                "start_param" if !value.is_empty() => start_param = Some(value.into_owned()),
                "user" => user = serde_json::from_str(&value).ok(),
                _ => {}
            }
        }

        Self {
            init_data,
            start_param,
            user,
        }
    }

    pub(crate) fn init_data(&self) -> &str {
        &self.init_data
    }

    pub(crate) fn start_param(&self) -> Option<&str> {
        self.start_param.as_deref()
    }

    pub(crate) fn user_id(&self) -> Option<i64> {
        self.user.as_ref()?.get("id")?.as_i64()
    }

    /// Query parameters that authenticate every game API request
    pub(crate) fn query(&self) -> Vec<(&'static str, &str)> {
        let mut query = vec![("tg_data", self.init_data.as_str())];
        if let Some(start_param) = &self.start_param {
            query.push(("referral_code", start_param));
        }
        query
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum AcquirerState {
    Disconnected,
    Connecting,
    AwaitingAppHandle,
    RequestingWebView,
    HaveToken,
}

/// The Telegram side of the account as seen by its worker.
#[async_trait]
pub(crate) trait TelegramAccount: Send {
    /// Returns `Ok(None)` if the handshake failed for a reason worth retrying
    /// later. Terminal session problems are returned as errors.
    async fn acquire_web_session(&mut self, first_run: bool) -> Result<Option<WebSession>>;

    async fn join_channel(&mut self, link: &str) -> Result;
}

/// Drives the account's session through the web view handshake. All the
/// Telegram traffic of the account happens under its inter-process lock.
pub(crate) struct WebSessionAcquirer<S> {
    account: String,
    session: S,
    lock: InterProcessLock,
    ref_id: String,
    bot: Option<BotPeer>,
    state: AcquirerState,
}

impl<S: TgSession> WebSessionAcquirer<S> {
    pub(crate) fn new(
        account: impl Into<String>,
        session: S,
        lock: InterProcessLock,
        ref_id: String,
    ) -> Self {
        Self {
            account: account.into(),
            session,
            lock,
            ref_id,
            bot: None,
            state: AcquirerState::Disconnected,
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> AcquirerState {
        self.state
    }

    fn transition(&mut self, state: AcquirerState) {
        trace!(account = %self.account, from = %self.state, to = %state, "Acquirer state transition");
        self.state = state;
    }

    pub(crate) async fn acquire(&mut self, first_run: bool) -> Result<Option<WebSession>> {
        let _guard = self
            .lock
            .acquire()
            .await
            .map_err(|source| err!(TgError::Lock { source }))?;

        let result = self.handshake(first_run).await;

        let result = match result {
            Ok(web_session) => Ok(Some(web_session)),
            Err(err) if err.is_terminal() => Err(err),
            Err(err) => {
                warn!(
                    account = %self.account,
                    err = tracing_err(&err),
                    "Unknown error during the web view handshake"
                );
                tokio::time::sleep(UNKNOWN_ERROR_DELAY).await;
                Ok(None)
            }
        };

        self.disconnect().await;

        result
    }

    async fn handshake(&mut self, first_run: bool) -> Result<WebSession> {
        self.transition(AcquirerState::Connecting);
        self.session.connect().await?;

        let bot = match self.bot {
            Some(bot) => bot,
            None => {
                self.transition(AcquirerState::AwaitingAppHandle);
                let bot = loop {
                    match self.session.resolve_bot(BOT_USERNAME).await {
                        Ok(bot) => break bot,
                        Err(err) => wait_out_flood(&self.account, self.state, err).await?,
                    }
                };
                self.bot = Some(bot);
                bot
            }
        };

        jitter::sleep_uniform(1.0, 2.0).await;

        let start_param = first_run.then(|| self.pick_start_param());

        self.transition(AcquirerState::RequestingWebView);
        let url = loop {
            let result = self
                .session
                .request_app_web_view(bot, APP_SHORT_NAME, start_param.as_deref())
                .await;

            match result {
                Ok(url) => break url,
                Err(err) => wait_out_flood(&self.account, self.state, err).await?,
            }
        };

        let web_session = WebSession::from_web_view_url(&url)?;
        self.transition(AcquirerState::HaveToken);

        Ok(web_session)
    }

    fn pick_start_param(&self) -> String {
        if jitter::chance(REF_ID_PROBABILITY) {
            self.ref_id.clone()
        } else {
            FALLBACK_REF_ID.to_owned()
        }
    }

    /// Subscribes the account to the channel from the `t.me` link.
    pub(crate) async fn subscribe_to_channel(&mut self, link: &str) -> Result {
        let Some(channel) = ChannelLink::parse(link) else {
            debug!(account = %self.account, link, "Skipping the channel link");
            return Ok(());
        };

        let _guard = self
            .lock
            .acquire()
            .await
            .map_err(|source| err!(TgError::Lock { source }))?;

        self.transition(AcquirerState::Connecting);

        let result = async {
            self.session.connect().await?;
            self.session.join_channel(&channel).await
        }
        .await;

        let result = match result {
            Ok(peer) => {
                info!(account = %self.account, link, "Subscribed to the channel");
                if let Some(peer) = peer {
                    mute_channel(&mut self.session, &self.account, peer).await;
                }
                Ok(())
            }
            Err(err) => {
                warn!(
                    account = %self.account,
                    link,
                    err = tracing_err(&err),
                    "Failed to subscribe to the channel"
                );
                Err(err)
            }
        };

        self.disconnect().await;
        jitter::sleep_uniform(15.0, 20.0).await;

        result
    }

    async fn disconnect(&mut self) {
        if self.state != AcquirerState::Disconnected {
            self.session.disconnect().await;
            self.transition(AcquirerState::Disconnected);
            tokio::time::sleep(DISCONNECT_COOLDOWN).await;
        }
    }
}

/// Failure to mute is not a reason to fail the subscription.
async fn mute_channel<S: TgSession>(session: &mut S, account: &str, channel: ChannelPeer) {
    let until = (chrono::Utc::now() + chrono::Duration::days(CHANNEL_MUTE_DAYS)).timestamp();
    let until = i32::try_from(until).unwrap_or(i32::MAX);

    match session.mute_channel(channel, until).await {
        Ok(()) => debug!(account, ?channel, "Muted the channel"),
        Err(err) => warn!(
            account,
            ?channel,
            err = tracing_err(&err),
            "Failed to mute the channel"
        ),
    }
}

/// Sleeps for the time Telegram asked to wait, so that the caller can
/// repeat the same transition. Any other error is given back.
async fn wait_out_flood(account: &str, state: AcquirerState, err: crate::Error) -> Result {
    let ErrorClass::RateLimited { retry_after } = err.class() else {
        return Err(err);
    };

    let delay = retry_after + FLOOD_WAIT_MARGIN;
    warn!(
        account,
        %state,
        delay = tracing_duration(delay),
        "Flood wait, sleeping before retrying"
    );
    tokio::time::sleep(delay).await;

    Ok(())
}

#[async_trait]
impl<S: TgSession> TelegramAccount for WebSessionAcquirer<S> {
    async fn acquire_web_session(&mut self, first_run: bool) -> Result<Option<WebSession>> {
        self.acquire(first_run).await
    }

    async fn join_channel(&mut self, link: &str) -> Result {
        self.subscribe_to_channel(link).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    fn init_data() -> String {
        form_urlencoded::Serializer::new(String::new())
            .append_pair("query_id", "AAHdF6IQAAAAAN0XohDhrOrc")
            .append_pair(
                "user",
                r#"{"id":279058397,"first_name":"Vlad & Co","username":"vdkrasny","language_code":"en"}"#,
            )
            .append_pair("auth_date", "1662771648")
            .append_pair("start_param", "s5XexnShM18Ftejz")
            .append_pair("hash", "c501b71e775f74ce10e377dea85a7ea24ecd640b223ea86dfe453e0eaed2e2b2")
            .finish()
    }

    fn web_view_url(init_data: &str) -> String {
        let fragment = form_urlencoded::Serializer::new(String::new())
            .append_pair("tgWebAppData", init_data)
            .append_pair("tgWebAppVersion", "7.10")
            .append_pair("tgWebAppPlatform", "android")
            .finish();

        format!("https://tte.dogiators.com/#{fragment}")
    }

    #[test]
    fn web_session_round_trip() {
        let init_data = init_data();
        let session = WebSession::from_web_view_url(&web_view_url(&init_data)).unwrap();

        assert_eq!(session.init_data(), init_data);
        assert_eq!(session.start_param(), Some("s5XexnShM18Ftejz"));
        assert_eq!(session.user_id(), Some(279058397));

        // The query the game receives decodes back to the very same init data
        let mut url = url::Url::parse("https://tte.dogiators.com/api/v1/profile/init").unwrap();
        url.query_pairs_mut().extend_pairs(session.query());
        let decoded: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(decoded[0], ("tg_data".to_owned(), init_data));
        assert_eq!(
            decoded[1],
            ("referral_code".to_owned(), "s5XexnShM18Ftejz".to_owned())
        );
    }

    #[test]
    fn web_view_url_without_app_data() {
        let err = WebSession::from_web_view_url("https://tte.dogiators.com/#tgWebAppVersion=7.10")
            .unwrap_err();
        assert_matches!(
            err.kind(),
            crate::error::ErrorKind::Tg {
                source: TgError::MissingWebAppData
            }
        );
    }

    /// Scripted session that records the moments of the web view requests
    #[derive(Default, Clone)]
    struct FakeSession {
        web_view_results: Arc<Mutex<VecDeque<Result<String>>>>,
        web_view_requests: Arc<Mutex<Vec<(Instant, Option<String>)>>>,
        resolves: Arc<Mutex<usize>>,
        connected: Arc<Mutex<bool>>,
        mutes: Arc<Mutex<Vec<(ChannelPeer, i32)>>>,
        mute_fails: bool,
    }

    const CHANNEL: ChannelPeer = ChannelPeer {
        channel_id: 100,
        access_hash: 5,
    };

    impl FakeSession {
        fn with_results(results: impl IntoIterator<Item = Result<String>>) -> Self {
            Self {
                web_view_results: Arc::new(Mutex::new(results.into_iter().collect())),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl TgSession for FakeSession {
        async fn connect(&mut self) -> Result {
            *self.connected.lock().unwrap() = true;
            Ok(())
        }

        async fn disconnect(&mut self) {
            *self.connected.lock().unwrap() = false;
        }

        async fn resolve_bot(&mut self, _username: &str) -> Result<BotPeer> {
            *self.resolves.lock().unwrap() += 1;
            Ok(BotPeer {
                user_id: 42,
                access_hash: 7,
            })
        }

        async fn request_app_web_view(
            &mut self,
            _bot: BotPeer,
            _short_name: &str,
            start_param: Option<&str>,
        ) -> Result<String> {
            self.web_view_requests
                .lock()
                .unwrap()
                .push((Instant::now(), start_param.map(ToOwned::to_owned)));

            self.web_view_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(web_view_url(&init_data())))
        }

        async fn join_channel(&mut self, _channel: &ChannelLink) -> Result<Option<ChannelPeer>> {
            Ok(Some(CHANNEL))
        }

        async fn mute_channel(&mut self, channel: ChannelPeer, until: i32) -> Result {
            self.mutes.lock().unwrap().push((channel, until));
            if self.mute_fails {
                return Err(TgError::Rpc {
                    code: 400,
                    name: "PEER_ID_INVALID".to_owned(),
                }
                .into());
            }
            Ok(())
        }
    }

    fn acquirer(dir: &tempfile::TempDir, session: FakeSession) -> WebSessionAcquirer<FakeSession> {
        let lock = InterProcessLock::new(dir.path().join("lock_files/alice.lock"));
        WebSessionAcquirer::new("alice", session, lock, "my-ref".to_owned())
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn flood_wait_delays_the_next_request() {
        let dir = tempfile::tempdir().unwrap();
        let session = FakeSession::with_results([Err(TgError::FloodWait { seconds: 30 }.into())]);
        let requests = session.web_view_requests.clone();
        let connected = session.connected.clone();

        let mut acquirer = acquirer(&dir, session);
        let web_session = acquirer.acquire(false).await.unwrap();

        assert!(web_session.is_some());
        assert_eq!(acquirer.state(), AcquirerState::Disconnected);
        assert!(!*connected.lock().unwrap());

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].0 - requests[0].0 >= Duration::from_secs(33));
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn joined_channel_is_muted_for_a_year() {
        let dir = tempfile::tempdir().unwrap();
        let session = FakeSession::default();
        let mutes = session.mutes.clone();

        let mut acquirer = acquirer(&dir, session);
        acquirer
            .subscribe_to_channel("https://t.me/dogiators")
            .await
            .unwrap();

        let mutes = mutes.lock().unwrap();
        assert_eq!(mutes.len(), 1);

        let (channel, until) = mutes[0];
        assert_eq!(channel, CHANNEL);

        let in_364_days = chrono::Utc::now() + chrono::Duration::days(364);
        assert!(i64::from(until) > in_364_days.timestamp());
        assert_eq!(acquirer.state(), AcquirerState::Disconnected);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn failed_mute_keeps_the_subscription() {
        let dir = tempfile::tempdir().unwrap();
        let session = FakeSession {
            mute_fails: true,
            ..Default::default()
        };
        let mutes = session.mutes.clone();

        let mut acquirer = acquirer(&dir, session);
        acquirer
            .subscribe_to_channel("https://t.me/+AbCdEf")
            .await
            .unwrap();

        assert_eq!(mutes.lock().unwrap().len(), 1);

        // Ignored links are neither joined nor muted
        acquirer
            .subscribe_to_channel("https://t.me/money")
            .await
            .unwrap();
        assert_eq!(mutes.lock().unwrap().len(), 1);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn banned_account_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let banned = TgError::Banned {
            reason: "USER_DEACTIVATED_BAN".to_owned(),
        };
        let session = FakeSession::with_results([Err(banned.into())]);

        let err = acquirer(&dir, session).acquire(false).await.unwrap_err();
        assert!(err.is_terminal());
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn unknown_error_yields_no_token() {
        let dir = tempfile::tempdir().unwrap();
        let rpc = TgError::Rpc {
            code: 400,
            name: "BOT_APP_INVALID".to_owned(),
        };
        let session = FakeSession::with_results([Err(rpc.into())]);

        let mut acquirer = acquirer(&dir, session);
        assert_eq!(acquirer.acquire(false).await.unwrap(), None);
        assert_eq!(acquirer.state(), AcquirerState::Disconnected);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn bot_is_resolved_once_and_start_param_is_sent_on_first_run_only() {
        let dir = tempfile::tempdir().unwrap();
        let session = FakeSession::default();
        let resolves = session.resolves.clone();
        let requests = session.web_view_requests.clone();

        let mut acquirer = acquirer(&dir, session);
        acquirer.acquire(true).await.unwrap().unwrap();
        acquirer.acquire(false).await.unwrap().unwrap();

        assert_eq!(*resolves.lock().unwrap(), 1);

        let requests = requests.lock().unwrap();
        assert_matches!(
            requests[0].1.as_deref(),
            Some("my-ref" | FALLBACK_REF_ID)
        );
        assert_eq!(requests[1].1, None);
    }
}
