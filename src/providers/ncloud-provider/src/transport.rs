//! One HTTP round trip against the music API, classified but never retried.

use crate::error::CallError;
use ncloud_core::config::ProviderConfig;
use ncloud_core::redact::redact_secrets;
use reqwest::header::{HeaderMap, COOKIE, RETRY_AFTER};
use reqwest::Client;
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use url::Url;

const SUCCESS_CODES: &[i64] = &[200];

/// A `GET` against one endpoint of the API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    pub endpoint: &'static str,
    pub query: Vec<(&'static str, String)>,
    /// Envelope `code` values that count as success for this endpoint.
    pub accepted_codes: &'static [i64],
}

impl ApiRequest {
    pub fn get(endpoint: &'static str) -> Self {
        Self {
            endpoint,
            query: Vec::new(),
            accepted_codes: SUCCESS_CODES,
        }
    }

    pub fn param(mut self, name: &'static str, value: impl ToString) -> Self {
        self.query.push((name, value.to_string()));
        self
    }

    pub fn accepting(mut self, codes: &'static [i64]) -> Self {
        self.accepted_codes = codes;
        self
    }
}

/// A response that passed classification.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub code: Option<i64>,
    pub body: Value,
}

pub struct HttpTransport {
    client: Client,
    base_url: Url,
}

impl HttpTransport {
    pub fn new(config: &ProviderConfig) -> Result<Self, CallError> {
        let base_url = Url::parse(config.api_base_url.trim_end_matches('/'))
            .map_err(|e| CallError::permanent(format!("invalid api_base_url: {e}")))?;
        let client = Client::builder()
            .connect_timeout(config.request_timeout())
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| CallError::permanent(e.to_string()))?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint_url(&self, endpoint: &str) -> Result<Url, CallError> {
        let joined = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        );
        Url::parse(&joined).map_err(|e| CallError::permanent(format!("invalid endpoint URL: {e}")))
    }

    /// Performs one call with the configured timeout.
    ///
    /// `cookie` is sent verbatim as the `Cookie` header. Every request carries
    /// a `timestamp` parameter so intermediaries never serve a cached answer.
    pub async fn execute(
        &self,
        request: &ApiRequest,
        cookie: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<RawResponse, CallError> {
        let mut url = self.endpoint_url(request.endpoint)?;
        {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in &request.query {
                pairs.append_pair(name, value);
            }
            pairs.append_pair("timestamp", &chrono::Utc::now().timestamp_millis().to_string());
        }

        let mut builder = self.client.get(url.clone());
        if let Some(cookie) = cookie {
            builder = builder.header(COOKIE, cookie);
        }

        let started = Instant::now();
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CallError::Cancelled),
            sent = builder.send() => sent.map_err(CallError::from_reqwest)?,
        };

        let status = response.status().as_u16();
        let retry_after = parse_retry_after(response.headers());
        let bytes = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CallError::Cancelled),
            body = response.bytes() => body.map_err(CallError::from_reqwest)?,
        };
        let body: Option<Value> = serde_json::from_slice(&bytes).ok();
        let code = body
            .as_ref()
            .and_then(|b| b.get("code"))
            .and_then(Value::as_i64);

        tracing::debug!(
            url = %redact_secrets(url.as_str()),
            status,
            code,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "api call completed"
        );

        let message = body
            .as_ref()
            .and_then(|b| b.get("message").or_else(|| b.get("msg")))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{} answered HTTP {status}", request.endpoint));
        classify(request, status, code, retry_after, message)?;

        let body = body.ok_or_else(|| CallError::Permanent {
            message: format!("{} returned a non-JSON body", request.endpoint),
            status: Some(status),
        })?;
        Ok(RawResponse { status, code, body })
    }
}

/// Sorts an HTTP status plus envelope code into success or a failure class.
pub fn classify(
    request: &ApiRequest,
    status: u16,
    code: Option<i64>,
    retry_after: Option<Duration>,
    message: String,
) -> Result<(), CallError> {
    if status == 401 || code == Some(301) {
        return Err(CallError::Unauthorized { message });
    }
    if status == 429 || matches!(code, Some(405) | Some(429)) {
        return Err(CallError::Transient {
            message,
            status: Some(status),
            retry_after,
        });
    }
    if status >= 500 || code.is_some_and(|c| (500..600).contains(&c)) {
        return Err(CallError::Transient {
            message,
            status: Some(status),
            retry_after: None,
        });
    }
    if status == 404 || code == Some(404) {
        return Err(CallError::NotFound {
            entity: request.endpoint.to_string(),
        });
    }
    if !(200..300).contains(&status) {
        return Err(CallError::Permanent {
            message,
            status: Some(status),
        });
    }
    match code {
        Some(code) if !request.accepted_codes.contains(&code) => Err(CallError::Permanent {
            message: format!("{message} (code {code})"),
            status: Some(status),
        }),
        _ => Ok(()),
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn search() -> ApiRequest {
        ApiRequest::get("/cloudsearch")
    }

    #[test]
    fn success_needs_accepted_code() {
        assert!(classify(&search(), 200, Some(200), None, String::new()).is_ok());
        assert!(classify(&search(), 200, None, None, String::new()).is_ok());
        assert!(matches!(
            classify(&search(), 200, Some(-460), None, "cheating".into()),
            Err(CallError::Permanent { .. })
        ));

        let check = ApiRequest::get("/login/qr/check").accepting(&[800, 801, 802, 803]);
        assert!(classify(&check, 200, Some(801), None, String::new()).is_ok());
    }

    #[test]
    fn auth_failures_are_unauthorized() {
        assert!(matches!(
            classify(&search(), 401, None, None, String::new()),
            Err(CallError::Unauthorized { .. })
        ));
        assert!(matches!(
            classify(&search(), 301, Some(301), None, "need login".into()),
            Err(CallError::Unauthorized { .. })
        ));
    }

    #[test]
    fn throttling_and_server_errors_are_transient() {
        let err = classify(
            &search(),
            429,
            None,
            Some(Duration::from_secs(2)),
            String::new(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            CallError::Transient {
                message: String::new(),
                status: Some(429),
                retry_after: Some(Duration::from_secs(2)),
            }
        );
        assert!(classify(&search(), 200, Some(405), None, String::new())
            .unwrap_err()
            .is_transient());
        assert!(classify(&search(), 502, None, None, String::new())
            .unwrap_err()
            .is_transient());
    }

    #[test]
    fn other_client_errors_are_permanent() {
        assert!(matches!(
            classify(&search(), 404, None, None, String::new()),
            Err(CallError::NotFound { .. })
        ));
        assert!(matches!(
            classify(&search(), 400, Some(400), None, String::new()),
            Err(CallError::Permanent { .. })
        ));
    }

    #[test]
    fn retry_after_seconds_are_parsed() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("3"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(3)));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("soon"));
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn endpoint_urls_keep_base_path() {
        let mut config = ProviderConfig::default();
        config.api_base_url = "http://localhost:3000/api/".into();
        let transport = HttpTransport::new(&config).unwrap();
        assert_eq!(
            transport.endpoint_url("/cloudsearch").unwrap().as_str(),
            "http://localhost:3000/api/cloudsearch"
        );
    }
}
