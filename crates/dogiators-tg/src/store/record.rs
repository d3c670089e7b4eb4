use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Per-account settings persisted in the shared accounts config.
///
/// The fields the application doesn't know about are kept in [`Self::extra`],
/// so that rewriting a record never loses data written by other tools.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct AccountRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) api: Option<ApiParams>,

    /// - `None` the proxy was never allocated for this account
    /// - `Some(None)` the account explicitly works without a proxy
    /// - `Some(Some(url))` the account is bound to the proxy
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "::serde_with::rust::double_option"
    )]
    pub(crate) proxy: Option<Option<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) user_agent: Option<String>,

    #[serde(default)]
    pub(crate) first_run_done: bool,

    #[serde(flatten)]
    pub(crate) extra: Map<String, Value>,
}

/// Telegram application credentials plus optional device fingerprint
/// overrides for the account.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct ApiParams {
    pub(crate) api_id: i32,
    pub(crate) api_hash: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) device_model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) system_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) app_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) system_lang_code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) lang_pack: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) lang_code: Option<String>,

    #[serde(flatten)]
    pub(crate) extra: Map<String, Value>,
}

impl ApiParams {
    pub(crate) fn new(api_id: i32, api_hash: impl Into<String>) -> Self {
        Self {
            api_id,
            api_hash: api_hash.into(),
            ..Default::default()
        }
    }
}

/// Keys that older versions of the accounts config kept at the top level of
/// the record instead of the `api` object.
const LEGACY_API_KEYS: &[&str] = &[
    "api_id",
    "api_hash",
    "device_model",
    "system_version",
    "app_version",
    "system_lang_code",
    "lang_pack",
    "lang_code",
];

/// Moves the legacy top-level API keys of the record into its `api` object.
/// Values already present in `api` win over the legacy ones.
/// Returns `true` if the record was changed.
pub(crate) fn migrate_legacy_record(record: &mut Value) -> bool {
    let Some(record) = record.as_object_mut() else {
        return false;
    };

    let legacy: Vec<_> = LEGACY_API_KEYS
        .iter()
        .filter_map(|&key| Some((key, record.remove(key)?)))
        .collect();

    if legacy.is_empty() {
        return false;
    }

    let api = record
        .entry("api")
        .or_insert_with(|| Value::Object(Map::new()));

    if !api.is_object() {
        *api = Value::Object(Map::new());
    }

    if let Value::Object(api) = api {
        for (key, value) in legacy {
            api.entry(key).or_insert(value);
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use expect_test::expect;
    use serde_json::json;

    #[test]
    fn proxy_tri_state() {
        let parse = |value: Value| serde_json::from_value::<AccountRecord>(value).unwrap().proxy;

        assert_eq!(parse(json!({})), None);
        assert_eq!(parse(json!({ "proxy": null })), Some(None));
        assert_eq!(
            parse(json!({ "proxy": "socks5://1.2.3.4:1080" })),
            Some(Some("socks5://1.2.3.4:1080".to_owned()))
        );

        let proxyless = AccountRecord {
            proxy: Some(None),
            ..Default::default()
        };
        expect![[r#"{"proxy":null,"first_run_done":false}"#]]
            .assert_eq(&serde_json::to_string(&proxyless).unwrap());
    }

    #[test]
    fn unknown_fields_survive_a_rewrite() {
        let input = json!({
            "api": { "api_id": 4, "api_hash": "hash", "sdk": 33 },
            "user_agent": "Mozilla/5.0",
            "notes": { "bought": "2024-06-01" },
        });

        let record: AccountRecord = serde_json::from_value(input).unwrap();
        let output = serde_json::to_value(&record).unwrap();

        assert_eq!(output["notes"], json!({ "bought": "2024-06-01" }));
        assert_eq!(output["api"]["sdk"], json!(33));
        assert_eq!(output["first_run_done"], json!(false));
    }

    #[test]
    fn legacy_record_migration() {
        let mut record = json!({
            "api_id": 6,
            "api_hash": "legacy",
            "device_model": "Pixel 7",
            "api": { "api_hash": "fresh" },
            "proxy": null,
        });

        assert!(migrate_legacy_record(&mut record));

        expect![[r#"
            {
              "api": {
                "api_hash": "fresh",
                "api_id": 6,
                "device_model": "Pixel 7"
              },
              "proxy": null
            }"#]]
        .assert_eq(&serde_json::to_string_pretty(&record).unwrap());

        assert!(!migrate_legacy_record(&mut record));
    }
}
