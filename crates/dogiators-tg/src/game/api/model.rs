//! JSON shapes of the game API. The server omits fields freely, so almost
//! everything here has a default.
use crate::game::GameApiError;
use crate::{err, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Wrapper of every game API response
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    #[serde(default)]
    status: bool,
    result: Option<T>,
}

impl<T> Envelope<T> {
    /// Fails if the server reported `status: false` or didn't send the result.
    pub(crate) fn into_result(self, endpoint: &'static str) -> Result<T> {
        match self {
            Self {
                status: true,
                result: Some(result),
            } => Ok(result),
            _ => Err(err!(GameApiError::Rejected { endpoint })),
        }
    }

    /// Same as [`Self::into_result`] for the actions where the result is irrelevant
    pub(crate) fn into_status(self, endpoint: &'static str) -> Result {
        if !self.status {
            return Err(err!(GameApiError::Rejected { endpoint }));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProfileResult {
    pub(crate) profile: Option<Profile>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub(crate) struct Profile {
    pub(crate) balance: f64,
    pub(crate) level: u32,
    pub(crate) profit_per_hour: f64,
    pub(crate) cur_energy: f64,
    pub(crate) profit_per_tap: Option<f64>,
    pub(crate) lottery_tickets: u32,
    pub(crate) referrals_count: u32,
    pub(crate) is_onboarded: bool,
}

impl Profile {
    const DEFAULT_PROFIT_PER_TAP: u64 = 10;

    pub(crate) fn profit_per_tap(&self) -> u64 {
        self.profit_per_tap
            .map(|profit| profit as u64)
            .filter(|&profit| profit > 0)
            .unwrap_or(Self::DEFAULT_PROFIT_PER_TAP)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct InitProfileRequest<'a> {
    pub(crate) taps: u64,
    pub(crate) profit: u64,
    pub(crate) ts: u64,
    pub(crate) timezone: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub(crate) struct TapsUpdate {
    pub(crate) taps: u64,
    pub(crate) profit: u64,
    pub(crate) timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub(crate) struct OnboardingUpdate {
    pub(crate) is_onboarded: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub(crate) struct QuestsInfo {
    pub(crate) daily_rewards: DailyRewards,
    pub(crate) subscriptions_state: Vec<SubscriptionQuest>,
}

impl QuestsInfo {
    /// Today's daily reward if it is still not claimed
    pub(crate) fn claimable_daily_reward(&self) -> Option<&RewardDay> {
        self.daily_rewards
            .reward_days
            .iter()
            .find(|day| day.is_current)
            .filter(|day| !day.is_completed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub(crate) struct DailyRewards {
    pub(crate) reward_days: Vec<RewardDay>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub(crate) struct RewardDay {
    #[serde(default)]
    pub(crate) is_current: bool,

    /// Missing value means there is nothing to claim
    #[serde(default = "default_true")]
    pub(crate) is_completed: bool,

    #[serde(default)]
    pub(crate) value: Value,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub(crate) struct SubscriptionQuest {
    #[serde(rename = "type")]
    pub(crate) kind: String,
    pub(crate) link: Option<String>,
    pub(crate) is_completed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub(crate) struct SubscriptionClaim<'a> {
    #[serde(rename = "type")]
    pub(crate) kind: &'a str,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub(crate) struct QuestReward {
    pub(crate) profit: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub(crate) struct SpinPrize {
    pub(crate) value: Value,
    #[serde(rename = "type")]
    pub(crate) kind: String,
}

#[derive(
    derive_more::Display, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub(crate) struct UpgradeId(pub(crate) i64);

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub(crate) struct UpgradeCatalog {
    pub(crate) system_upgrades: Vec<Upgrade>,
    pub(crate) special_upgrades: Vec<Upgrade>,
    pub(crate) arena_upgrades: Vec<Upgrade>,
}

impl UpgradeCatalog {
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Upgrade> {
        self.system_upgrades
            .iter()
            .chain(&self.special_upgrades)
            .chain(&self.arena_upgrades)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub(crate) struct Upgrade {
    pub(crate) id: UpgradeId,

    #[serde(default)]
    pub(crate) title: String,

    #[serde(default)]
    pub(crate) status: UpgradeStatus,

    #[serde(default)]
    pub(crate) next_modifier: NextModifier,
}

impl Upgrade {
    pub(crate) fn describe(&self) -> String {
        match self.next_modifier.level {
            Some(level) => format!("{} (level {level})", self.title),
            None => self.title.clone(),
        }
    }
}

/// Anything the server reports besides `active` and `inactive` can't be bought
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub(crate) enum UpgradeStatus {
    Active,
    Inactive,
    #[default]
    Locked,
}

impl<'de> Deserialize<'de> for UpgradeStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let status = Option::<String>::deserialize(deserializer)?.unwrap_or_default();

        Ok(match status.to_ascii_lowercase().as_str() {
            "active" => Self::Active,
            "inactive" => Self::Inactive,
            _ => Self::Locked,
        })
    }
}

impl UpgradeStatus {
    pub(crate) fn is_purchasable(self) -> bool {
        matches!(self, Self::Active | Self::Inactive)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub(crate) struct NextModifier {
    pub(crate) level: Option<u32>,
    pub(crate) price: Option<f64>,
    pub(crate) profit_per_hour_relative: f64,
    pub(crate) requirements: Option<Requirements>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub(crate) struct Requirements {
    pub(crate) level: Option<u32>,
    pub(crate) referrals: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub(crate) struct BuyUpgradeRequest {
    pub(crate) upgrade_id: UpgradeId,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct IpInfo {
    pub(crate) timezone: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn envelope_status() {
        let ok: Envelope<ProfileResult> =
            serde_json::from_value(json!({ "status": true, "result": { "profile": null } }))
                .unwrap();
        assert_matches!(ok.into_result("profile/init"), Ok(ProfileResult { profile: None }));

        let rejected: Envelope<ProfileResult> =
            serde_json::from_value(json!({ "status": false, "result": { "profile": {} } }))
                .unwrap();
        assert!(rejected.into_result("profile/init").is_err());

        let no_status: Envelope<Value> = serde_json::from_value(json!({ "result": {} })).unwrap();
        assert!(no_status.into_result("quests/info").is_err());
    }

    #[test]
    fn quests_defaults() {
        let quests: QuestsInfo = serde_json::from_value(json!({
            "daily_rewards": {
                "reward_days": [
                    { "is_current": false, "is_completed": true, "value": 500 },
                    { "is_current": true, "value": 1000 },
                ]
            },
            "subscriptions_state": [
                { "type": "subscribe:telegram", "link": "https://t.me/dogiators" },
                { "type": "verify:ton_wallet_verify", "is_completed": true },
            ]
        }))
        .unwrap();

        // A day without the completion flag is treated as completed
        assert_eq!(quests.claimable_daily_reward(), None);
        assert!(!quests.subscriptions_state[0].is_completed);
        assert!(quests.subscriptions_state[1].is_completed);
    }

    #[test]
    fn upgrade_statuses() {
        let catalog: UpgradeCatalog = serde_json::from_value(json!({
            "system_upgrades": [
                { "id": 1, "title": "Sword", "status": "ACTIVE" },
                { "id": 2, "title": "Shield", "status": "inactive",
                  "next_modifier": { "level": 3, "price": 100, "profit_per_hour_relative": 5 } },
            ],
            "arena_upgrades": [
                { "id": 3, "title": "Helmet", "status": "coming_soon" },
                { "id": 4, "title": "Boots" },
            ],
        }))
        .unwrap();

        let statuses: Vec<_> = catalog.iter().map(|upgrade| upgrade.status).collect();
        assert_eq!(
            statuses,
            [
                UpgradeStatus::Active,
                UpgradeStatus::Inactive,
                UpgradeStatus::Locked,
                UpgradeStatus::Locked,
            ]
        );

        assert_eq!(catalog.system_upgrades[1].describe(), "Shield (level 3)");
        assert_eq!(catalog.system_upgrades[1].next_modifier.price, Some(100.0));
    }

    #[test]
    fn profit_per_tap_default() {
        let profile: Profile = serde_json::from_value(json!({ "cur_energy": 1500 })).unwrap();
        assert_eq!(profile.profit_per_tap(), 10);

        let profile: Profile = serde_json::from_value(json!({ "profit_per_tap": 25 })).unwrap();
        assert_eq!(profile.profit_per_tap(), 25);
    }
}
