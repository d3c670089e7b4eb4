use rand::seq::SliceRandom;
use rand::Rng;

const CHROME_MAJOR_VERSIONS: std::ops::RangeInclusive<u32> = 110..=129;

/// `(android version, device model, build id)`
const ANDROID_DEVICES: &[(&str, &str, &str)] = &[
    ("13", "SM-G998B", "TP1A.220624.014"),
    ("14", "SM-S918B", "UP1A.231005.007"),
    ("13", "SM-A546E", "TP1A.220624.014"),
    ("14", "Pixel 7", "AP2A.240605.024"),
    ("14", "Pixel 8 Pro", "AP1A.240505.005"),
    ("12", "2201123G", "SKQ1.211006.001"),
    ("13", "23049PCD8G", "TKQ1.221114.001"),
    ("13", "CPH2449", "TP1A.220905.001"),
    ("11", "M2101K6G", "RKQ1.200826.002"),
];

/// Generates a user agent of the Android Chrome WebView that the Telegram
/// app uses to open the mini apps.
pub(crate) fn generate_user_agent() -> String {
    let mut rng = rand::thread_rng();

    let (android, model, build) = ANDROID_DEVICES
        .choose(&mut rng)
        .copied()
        .unwrap_or(ANDROID_DEVICES[0]);

    let major = rng.gen_range(CHROME_MAJOR_VERSIONS);
    let chrome_build = rng.gen_range(5000..=6700);
    let chrome_patch = rng.gen_range(0..=200);

    format!(
        "Mozilla/5.0 (Linux; Android {android}; {model} Build/{build}; wv) \
        AppleWebKit/537.36 (KHTML, like Gecko) Version/4.0 \
        Chrome/{major}.0.{chrome_build}.{chrome_patch} Mobile Safari/537.36"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_looks_like_android_webview() {
        for _ in 0..100 {
            let user_agent = generate_user_agent();
            assert!(user_agent.contains("; wv)"), "{user_agent}");

            let major: u32 = lazy_regex::regex_captures!(r"Chrome/(\d+)\.", &user_agent)
                .map(|(_, major)| major.parse().unwrap())
                .unwrap();

            assert!(CHROME_MAJOR_VERSIONS.contains(&major), "{user_agent}");
        }
    }
}
