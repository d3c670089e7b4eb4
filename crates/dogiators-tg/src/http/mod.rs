mod basic_ext;
mod json_ext;

use crate::prelude::*;
use crate::{err_ctx, Result};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Method;
use reqwest_middleware::Middleware as _;
use reqwest_retry::policies::ExponentialBackoff;
use reqwest_retry::RetryTransientMiddleware;
use std::time::{Duration, Instant};

pub(crate) mod prelude {
    pub(crate) use super::basic_ext::RequestBuilderBasicExt;
    pub(crate) use super::json_ext::RequestBuilderJsonExt;
}

macro_rules! def_url_base {
    ($vis:vis $ident:ident, $url:literal) => {
        $vis fn $ident<T: AsRef<str>>(segments: impl IntoIterator<Item = T>) -> ::url::Url {
            let mut url: ::url::Url = $url.parse().unwrap();
            url.path_segments_mut().unwrap().extend(segments);
            url
        }
    };
}

pub(crate) use def_url_base;

/// Duration of a single real http request. If there were retries, then these
/// will appear as as separate observations.
const HTTP_REQUEST_DURATION: &str = "http_request_duration_seconds";

/// Same as [`HTTP_REQUEST_DURATION`] but covers the time it took to do
/// retries of the request.
const HTTP_REQUEST_EFFECTIVE_DURATION: &str = "http_request_effective_duration_seconds";

/// Transport timeout for the regular game API traffic
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout for the proxy liveness probe and the IP geolocation lookup
pub(crate) const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

pub(crate) type Client = reqwest_middleware::ClientWithMiddleware;

/// Creates a client for the game API that goes through the account's proxy
/// (if any) and sends the given browser-like headers with every request.
///
/// Only the requests with idempotent methods are retried. A purchase or a
/// taps update may be applied by the server even if the response is lost.
pub(crate) fn create_client(proxy: Option<&str>, default_headers: HeaderMap) -> Result<Client> {
    // Retry with exponentially increasing intervals between attempts.
    let retry_policy = ExponentialBackoff::builder()
        .backoff_exponent(2)
        .retry_bounds(Duration::from_millis(100), Duration::from_secs(3))
        .build_with_total_retry_duration(Duration::from_secs(20));

    let inner = base_client(proxy, DEFAULT_TIMEOUT)?
        .default_headers(default_headers)
        .build()
        .map_err(err_ctx!(HttpClientError::BuildClient))?;

    Ok(with_retries(inner, retry_policy))
}

fn with_retries(inner: reqwest::Client, retry_policy: ExponentialBackoff) -> Client {
    reqwest_middleware::ClientBuilder::new(inner)
        .with(OutermostObservingMiddleware)
        .with(IdempotentRetryMiddleware(
            RetryTransientMiddleware::new_with_policy(retry_policy),
        ))
        .with(InnermostObservingMiddleware)
        .build()
}

/// Creates a client with a short timeout and no retries. It is used to tell
/// if the proxy is alive at all, so retrying would only hide the problem.
pub(crate) fn create_probe_client(proxy: Option<&str>) -> Result<Client> {
    let inner = base_client(proxy, PROBE_TIMEOUT)?
        .build()
        .map_err(err_ctx!(HttpClientError::BuildClient))?;

    Ok(reqwest_middleware::ClientBuilder::new(inner)
        .with(InnermostObservingMiddleware)
        .build())
}

fn base_client(proxy: Option<&str>, timeout: Duration) -> Result<reqwest::ClientBuilder> {
    let builder = reqwest::Client::builder().timeout(timeout);

    let Some(proxy) = proxy else {
        return Ok(builder);
    };

    let proxy = reqwest::Proxy::all(proxy).map_err(err_ctx!(HttpClientError::BuildClient))?;

    Ok(builder.proxy(proxy))
}

/// Lets the non-idempotent requests bypass the retries
struct IdempotentRetryMiddleware(RetryTransientMiddleware<ExponentialBackoff>);

#[async_trait]
impl reqwest_middleware::Middleware for IdempotentRetryMiddleware {
    async fn handle(
        &self,
        request: reqwest::Request,
        extensions: &mut task_local_extensions::Extensions,
        next: reqwest_middleware::Next<'_>,
    ) -> reqwest_middleware::Result<reqwest::Response> {
        if !is_idempotent(request.method()) {
            return next.run(request, extensions).await;
        }
        self.0.handle(request, extensions, next).await
    }
}

fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::PUT | Method::DELETE | Method::TRACE
    )
}

struct OutermostObservingMiddleware;

#[async_trait]
impl reqwest_middleware::Middleware for OutermostObservingMiddleware {
    async fn handle(
        &self,
        request: reqwest::Request,
        extensions: &mut task_local_extensions::Extensions,
        next: reqwest_middleware::Next<'_>,
    ) -> reqwest_middleware::Result<reqwest::Response> {
        let span = debug_span!(
            "request",
            method = %request.method(),
            path = %request.url().path(),
        );
        measure_request(HTTP_REQUEST_EFFECTIVE_DURATION, request, extensions, next)
            .instrument(span)
            .await
    }
}

struct InnermostObservingMiddleware;

#[async_trait]
impl reqwest_middleware::Middleware for InnermostObservingMiddleware {
    async fn handle(
        &self,
        request: reqwest::Request,
        extensions: &mut task_local_extensions::Extensions,
        next: reqwest_middleware::Next<'_>,
    ) -> reqwest_middleware::Result<reqwest::Response> {
        let (result, duration) = measure_request(HTTP_REQUEST_DURATION, request, extensions, next)
            .with_duration()
            .await;

        let duration = tracing_duration(duration);

        let response = match &result {
            Ok(response) => response,
            Err(err) => {
                warn!(duration, err = tracing_err(err), "Network request failed");
                return result;
            }
        };

        let status = response.status();

        let Err(err) = response.error_for_status_ref() else {
            debug!(duration, %status, "Network request succeeded");
            return result;
        };

        warn!(
            err = tracing_err(&err),
            duration,
            %status,
            "Network request failed (error status)"
        );

        result
    }
}

async fn measure_request(
    histogram: &'static str,
    request: reqwest::Request,
    extensions: &mut task_local_extensions::Extensions,
    next: reqwest_middleware::Next<'_>,
) -> reqwest_middleware::Result<reqwest::Response> {
    let method = request.method().to_string();
    let host = request.url().host_str().unwrap_or("{unknown}").to_owned();

    let start = Instant::now();
    let result = next.run(request, extensions).await;
    let elapsed = start.elapsed();

    let status = match &result {
        Ok(response) => response.status().as_u16().to_string(),
        Err(_) => "{fatal}".to_owned(),
    };

    metrics::histogram!(
        histogram,
        elapsed.as_secs_f64(),
        "method" => method,
        "host" => host,
        "status" => status
    );

    result
}

/// Errors at the layer of the HTTP API
#[derive(Debug, thiserror::Error)]
pub(crate) enum HttpClientError {
    #[error("Failed to build an HTTP client")]
    BuildClient { source: reqwest::Error },

    #[error("HTTP request failed")]
    Request { source: reqwest_middleware::Error },

    #[error("Failed to read HTTP response")]
    ReadPayload { source: reqwest_middleware::Error },

    #[error("HTTP request has failed (HTTP status code: {status}):\n{body}")]
    BadResponseStatusCode {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("Received an unexpected response JSON object")]
    UnexpectedResponseJsonShape { source: serde_json::Error },
}
