use crate::store::ApiParams;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Deserialize;
use std::path::Path;

/// Device fingerprint reported to Telegram when the session connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DeviceProfile {
    pub(crate) device_model: String,
    pub(crate) system_version: String,
    pub(crate) app_version: String,
    pub(crate) system_lang_code: String,
    pub(crate) lang_code: String,
    pub(crate) lang_pack: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Platform {
    Android,
    AndroidX,
    Desktop,
    Ios,
}

impl Platform {
    fn from_api_id(api_id: i32) -> Self {
        match api_id {
            4 | 6 => Self::Android,
            21724 => Self::AndroidX,
            10840 => Self::Ios,
            _ => Self::Desktop,
        }
    }

    fn lang_pack(self) -> &'static str {
        match self {
            Self::Android | Self::AndroidX => "android",
            Self::Desktop => "tdesktop",
            Self::Ios => "ios",
        }
    }
}

const ANDROID_DEVICES: &[&str] = &[
    "Samsung SM-G998B",
    "Samsung SM-S918B",
    "Samsung SM-A546E",
    "Google Pixel 7",
    "Google Pixel 8 Pro",
    "Xiaomi 2201123G",
    "Xiaomi 23049PCD8G",
    "OnePlus CPH2449",
];

const IPHONES: &[&str] = &["iPhone 12", "iPhone 13 Pro", "iPhone 14", "iPhone 15 Pro Max"];

impl DeviceProfile {
    /// Generates a plausible fingerprint for the Telegram client that owns
    /// the given `api_id`.
    pub(crate) fn generate(api_id: i32) -> Self {
        let mut rng = rand::thread_rng();
        let platform = Platform::from_api_id(api_id);

        let (device_model, system_version, app_version) = match platform {
            Platform::Android | Platform::AndroidX => {
                let sdk = rng.gen_range(29..=34);
                let build = rng.gen_range(4000..=4900);
                let version = format!("10.{}.{} ({build})", rng.gen_range(10..=14), rng.gen_range(0..=3));
                (pick(ANDROID_DEVICES), format!("SDK {sdk}"), version)
            }
            Platform::Ios => {
                let system = format!("17.{}", rng.gen_range(0..=5));
                let app = format!("10.{}.{}", rng.gen_range(10..=14), rng.gen_range(0..=2));
                (pick(IPHONES), system, app)
            }
            Platform::Desktop => {
                let app = format!("5.{}.{} x64", rng.gen_range(0..=5), rng.gen_range(0..=3));
                ("Desktop".to_owned(), "Windows 10".to_owned(), app)
            }
        };

        Self {
            device_model,
            system_version,
            app_version,
            system_lang_code: "en-US".to_owned(),
            lang_code: "en".to_owned(),
            lang_pack: platform.lang_pack().to_owned(),
        }
    }

    /// Fills the fingerprint fields missing in the account's API params with
    /// generated values, so that they are persisted and stay the same across
    /// the restarts. Returns `true` if anything was filled.
    pub(crate) fn fill_missing(api: &mut ApiParams) -> bool {
        let generated = Self::generate(api.api_id);

        let slots = [
            (&mut api.device_model, generated.device_model),
            (&mut api.system_version, generated.system_version),
            (&mut api.app_version, generated.app_version),
            (&mut api.system_lang_code, generated.system_lang_code),
            (&mut api.lang_code, generated.lang_code),
            (&mut api.lang_pack, generated.lang_pack),
        ];

        let mut changed = false;
        for (slot, value) in slots {
            if slot.is_none() {
                *slot = Some(value);
                changed = true;
            }
        }
        changed
    }

    /// Takes the overrides from the account's API params, generating the
    /// rest of the fields.
    pub(crate) fn from_api(api: &ApiParams) -> Self {
        let generated = Self::generate(api.api_id);
        let or = |value: &Option<String>, default: String| value.clone().unwrap_or(default);

        Self {
            device_model: or(&api.device_model, generated.device_model),
            system_version: or(&api.system_version, generated.system_version),
            app_version: or(&api.app_version, generated.app_version),
            system_lang_code: or(&api.system_lang_code, generated.system_lang_code),
            lang_code: or(&api.lang_code, generated.lang_code),
            lang_pack: or(&api.lang_pack, generated.lang_pack),
        }
    }
}

fn pick(options: &[&str]) -> String {
    options
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or_default()
        .to_owned()
}

/// Metadata file that account shops put next to the session file
#[derive(Debug, Deserialize)]
struct SessionSidecar {
    app_id: i32,
    app_hash: String,
    device: Option<String>,
    sdk: Option<String>,
    app_version: Option<String>,
    system_lang_code: Option<String>,
    lang_code: Option<String>,
    lang_pack: Option<String>,
}

/// Converts the sidecar JSON to the account's API params.
pub(crate) fn parse_session_sidecar(content: &str) -> serde_json::Result<ApiParams> {
    let sidecar: SessionSidecar = serde_json::from_str(content)?;

    let lang_pack = sidecar
        .lang_pack
        .unwrap_or_else(|| Platform::from_api_id(sidecar.app_id).lang_pack().to_owned());

    Ok(ApiParams {
        api_id: sidecar.app_id,
        api_hash: sidecar.app_hash,
        device_model: sidecar.device,
        system_version: sidecar.sdk,
        app_version: sidecar.app_version,
        system_lang_code: sidecar.system_lang_code,
        lang_code: sidecar.lang_code,
        lang_pack: Some(lang_pack),
        extra: Default::default(),
    })
}

/// Path of the sidecar JSON for the given `.session` file
pub(crate) fn session_sidecar_path(session_file: &Path) -> std::path::PathBuf {
    session_file.with_extension("json")
}
