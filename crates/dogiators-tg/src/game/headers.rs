use super::GameApiError;
use crate::{err, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, InvalidHeaderValue, USER_AGENT};

const STATIC_HEADERS: &[(&str, &str)] = &[
    ("accept", "*/*"),
    ("accept-language", "en-US;q=0.9,en;q=0.8,id;q=0.7"),
    ("priority", "u=1, i"),
    ("origin", "https://tte.dogiators.com"),
    ("referer", "https://tte.dogiators.com/"),
    ("sec-ch-ua-mobile", "?1"),
    ("sec-ch-ua-platform", "\"Android\""),
    ("sec-fetch-dest", "empty"),
    ("sec-fetch-mode", "cors"),
    ("sec-fetch-site", "same-origin"),
    ("x-requested-with", "org.telegram.messenger"),
];

/// Headers of the mini app opened in the Telegram Android WebView.
pub(crate) fn browser_headers(user_agent: &str) -> Result<HeaderMap> {
    let invalid = |source: InvalidHeaderValue| {
        err!(GameApiError::InvalidUserAgent {
            user_agent,
            source,
        })
    };

    let mut headers: HeaderMap = STATIC_HEADERS
        .iter()
        .map(|&(name, value)| {
            (
                HeaderName::from_static(name),
                HeaderValue::from_static(value),
            )
        })
        .collect();

    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(user_agent).map_err(invalid)?,
    );

    if let Some(sec_ch_ua) = sec_ch_ua(user_agent) {
        headers.insert(
            HeaderName::from_static("sec-ch-ua"),
            HeaderValue::from_str(&sec_ch_ua).map_err(invalid)?,
        );
    }

    Ok(headers)
}

/// Client hint derived from the Chrome version in the user agent. `None` if
/// the user agent isn't a Chromium one.
pub(crate) fn sec_ch_ua(user_agent: &str) -> Option<String> {
    let (_, browser, major, ..) =
        lazy_regex::regex_captures!(r"(Chrome|Chromium)/(\d+)\.(\d+)\.(\d+)\.(\d+)", user_agent)?;

    let chromium = format!(r#""Chromium";v="{major}", "Not;A=Brand";v="24""#);

    if browser == "Chrome" {
        return Some(format!(r#"{chromium}, "Google Chrome";v="{major}""#));
    }

    Some(chromium)
}
