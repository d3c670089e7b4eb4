use crate::game::api::model::*;
use crate::game::GameApiError;
use crate::http::{self, def_url_base};
use crate::prelude::*;
use crate::proxy::Proxy;
use crate::tg::WebSession;
use crate::{err, Result};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Method;
use serde::de::DeserializeOwned;

def_url_base!(game_api, "https://tte.dogiators.com/api/v1");

const IP_GEOLOCATION_URL: &str = "http://ip-api.com/json/";
const FALLBACK_TIME_ZONE: &str = "Europe/Berlin";

/// Operations of the game API the account worker performs. Every request
/// is authenticated by the account's web session.
#[async_trait]
pub(crate) trait GameApi: Send + Sync {
    /// Time zone of the egress IP. Never fails, falls back to a fixed zone.
    async fn time_zone(&self) -> String;

    async fn init_profile(&self, session: &WebSession, time_zone: &str) -> Result<Profile>;

    /// Returns the onboarding flag reported by the server after the update
    async fn complete_onboarding(&self, session: &WebSession) -> Result<bool>;

    async fn send_taps(&self, session: &WebSession, taps: TapsUpdate) -> Result<Profile>;

    async fn spin_wheel(&self, session: &WebSession) -> Result<SpinPrize>;

    async fn quests(&self, session: &WebSession) -> Result<QuestsInfo>;

    async fn claim_daily_reward(&self, session: &WebSession) -> Result;

    async fn claim_subscription(&self, session: &WebSession, kind: &str) -> Result<QuestReward>;

    async fn upgrades(&self, session: &WebSession) -> Result<UpgradeCatalog>;

    async fn buy_upgrade(&self, session: &WebSession, upgrade_id: UpgradeId) -> Result;
}

pub(crate) struct GameClient {
    http: http::Client,

    /// Short-timeout client for the IP geolocation lookup
    geo: http::Client,
}

impl GameClient {
    /// Both clients go through the account's proxy, so that the game sees
    /// the same IP as the time zone was resolved for.
    pub(crate) fn new(proxy: Option<&Proxy>, headers: HeaderMap) -> Result<Self> {
        let proxy = proxy.map(ToString::to_string);
        Ok(Self {
            http: http::create_client(proxy.as_deref(), headers)?,
            geo: http::create_probe_client(proxy.as_deref())?,
        })
    }

    fn request(
        &self,
        method: Method,
        endpoint: &'static str,
        session: &WebSession,
    ) -> reqwest_middleware::RequestBuilder {
        self.http
            .request(method, game_api(endpoint.split('/')))
            .query(&session.query())
    }

    async fn call<T: DeserializeOwned + Send>(
        &self,
        endpoint: &'static str,
        request: reqwest_middleware::RequestBuilder,
    ) -> Result<T> {
        request
            .read_json::<Envelope<T>>()
            .await?
            .into_result(endpoint)
    }

    async fn call_for_status(
        &self,
        endpoint: &'static str,
        request: reqwest_middleware::RequestBuilder,
    ) -> Result {
        request
            .read_json::<Envelope<serde_json::Value>>()
            .await?
            .into_status(endpoint)
    }

    async fn call_for_profile(
        &self,
        endpoint: &'static str,
        request: reqwest_middleware::RequestBuilder,
    ) -> Result<Profile> {
        self.call::<ProfileResult>(endpoint, request)
            .await?
            .profile
            .ok_or_else(|| err!(GameApiError::MissingProfile { endpoint }))
    }
}

#[async_trait]
impl GameApi for GameClient {
    async fn time_zone(&self) -> String {
        let info = self.geo.get(IP_GEOLOCATION_URL).read_json::<IpInfo>().await;

        match info {
            Ok(IpInfo {
                timezone: Some(time_zone),
            }) => time_zone,
            Ok(IpInfo { timezone: None }) => {
                warn!(fallback = FALLBACK_TIME_ZONE, "No time zone in the IP info");
                FALLBACK_TIME_ZONE.to_owned()
            }
            Err(err) => {
                warn!(
                    fallback = FALLBACK_TIME_ZONE,
                    err = tracing_err(&err),
                    "Failed to resolve the time zone"
                );
                FALLBACK_TIME_ZONE.to_owned()
            }
        }
    }

    async fn init_profile(&self, session: &WebSession, time_zone: &str) -> Result<Profile> {
        let endpoint = "profile/init";
        let request = self
            .request(Method::POST, endpoint, session)
            .json(&InitProfileRequest {
                taps: 0,
                profit: 0,
                ts: 0,
                timezone: time_zone,
            });

        self.call_for_profile(endpoint, request).await
    }

    async fn complete_onboarding(&self, session: &WebSession) -> Result<bool> {
        let endpoint = "profile/update";
        let request = self
            .request(Method::PATCH, endpoint, session)
            .json(&OnboardingUpdate { is_onboarded: true });

        Ok(self.call_for_profile(endpoint, request).await?.is_onboarded)
    }

    async fn send_taps(&self, session: &WebSession, taps: TapsUpdate) -> Result<Profile> {
        let endpoint = "profile/update";
        let request = self.request(Method::PATCH, endpoint, session).json(&taps);

        self.call_for_profile(endpoint, request).await
    }

    async fn spin_wheel(&self, session: &WebSession) -> Result<SpinPrize> {
        // The app always opens the wheel before spinning it
        self.request(Method::GET, "fortune/info", session)
            .read_bytes()
            .await?;

        let endpoint = "fortune/simple-wheel/run";
        let request = self.request(Method::POST, endpoint, session);
        self.call(endpoint, request).await
    }

    async fn quests(&self, session: &WebSession) -> Result<QuestsInfo> {
        let endpoint = "quests/info";
        let request = self.request(Method::GET, endpoint, session);
        self.call(endpoint, request).await
    }

    async fn claim_daily_reward(&self, session: &WebSession) -> Result {
        let endpoint = "quests/daily-reward/claim";
        let request = self.request(Method::POST, endpoint, session);
        self.call_for_status(endpoint, request).await
    }

    async fn claim_subscription(&self, session: &WebSession, kind: &str) -> Result<QuestReward> {
        let endpoint = "quests/subscribe/claim";
        let request = self
            .request(Method::POST, endpoint, session)
            .json(&SubscriptionClaim { kind });

        self.call(endpoint, request).await
    }

    async fn upgrades(&self, session: &WebSession) -> Result<UpgradeCatalog> {
        let endpoint = "upgrade/list";
        let request = self.request(Method::GET, endpoint, session);
        self.call(endpoint, request).await
    }

    async fn buy_upgrade(&self, session: &WebSession, upgrade_id: UpgradeId) -> Result {
        let endpoint = "upgrade/buy";
        let request = self
            .request(Method::POST, endpoint, session)
            .json(&BuyUpgradeRequest { upgrade_id });

        self.call_for_status(endpoint, request).await
    }
}
