//! Identity resolver: one outbound probe through a proxy to learn its
//! public egress IP and coarse location.

use crate::error::ProbeError;
use crate::proxy::models::{Proxy, ProbeResult};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{redirect, Client, Proxy as ReqwestProxy, StatusCode};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

/// Default timeout for a probe in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default IP echo endpoint
pub const DEFAULT_PROBE_URL: &str = "https://ipinfo.io/json";

/// Chrome major version advertised in the browser headers
const CHROME_VERSION: &str = "133";

static USER_AGENT: Lazy<String> = Lazy::new(|| {
    format!(
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{}.0.0.0 Safari/537.36",
        CHROME_VERSION
    )
});

static SEC_CH_UA: Lazy<String> = Lazy::new(|| {
    format!(
        r#""Chromium";v="{v}", "Google Chrome";v="{v}", "Not_A Brand";v="99""#,
        v = CHROME_VERSION
    )
});

/// Browser navigation headers, in the order Chrome sends them
static BROWSER_HEADERS: Lazy<Vec<(&'static str, String)>> = Lazy::new(|| {
    vec![
        ("accept", "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7".to_string()),
        ("accept-language", "en-US,en;q=0.9".to_string()),
        ("priority", "u=0, i".to_string()),
        ("sec-ch-ua", SEC_CH_UA.clone()),
        ("sec-ch-ua-mobile", "?0".to_string()),
        ("sec-ch-ua-platform", r#""Windows""#.to_string()),
        ("sec-fetch-dest", "document".to_string()),
        ("sec-fetch-mode", "navigate".to_string()),
        ("sec-fetch-site", "none".to_string()),
        ("sec-fetch-user", "?1".to_string()),
        ("upgrade-insecure-requests", "1".to_string()),
        ("user-agent", USER_AGENT.clone()),
    ]
});

/// Performs one identity probe through a proxy.
///
/// Implementations must bound the probe with their own timeout; the
/// monitoring loop has no other cancellation.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn probe(&self, proxy: &Proxy) -> Result<ProbeResult, ProbeError>;
}

/// Body returned by the IP echo endpoint
#[derive(Debug, Deserialize)]
struct IpInfo {
    ip: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    region: String,
}

impl IpInfo {
    fn location(&self) -> String {
        format!("{}, {}", self.city, self.region)
    }
}

/// Configuration for the HTTP identity resolver
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Timeout for each probe
    pub timeout: Duration,
    /// IP echo endpoint returning `{"ip", "city", "region"}`
    pub probe_url: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            probe_url: DEFAULT_PROBE_URL.to_string(),
        }
    }
}

impl ResolverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_probe_url(mut self, url: String) -> Self {
        self.probe_url = url;
        self
    }
}

/// Resolver that asks an IP echo service through the proxy
#[derive(Debug, Clone, Default)]
pub struct HttpIdentityResolver {
    config: ResolverConfig,
}

impl HttpIdentityResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    /// Create a reqwest client routed through the proxy
    fn create_client(&self, proxy: &Proxy) -> Result<Client, ProbeError> {
        // The probe target is https, so http proxies must tunnel every scheme
        let reqwest_proxy = ReqwestProxy::all(proxy.url())?;

        let client = Client::builder()
            .proxy(reqwest_proxy)
            .timeout(self.config.timeout)
            .redirect(redirect::Policy::none())
            .default_headers(browser_headers()?)
            .build()?;

        Ok(client)
    }
}

#[async_trait]
impl IdentityResolver for HttpIdentityResolver {
    #[instrument(skip(self, proxy), fields(proxy = %proxy))]
    async fn probe(&self, proxy: &Proxy) -> Result<ProbeResult, ProbeError> {
        let client = self.create_client(proxy)?;

        let start = Instant::now();
        let response = client.get(&self.config.probe_url).send().await?;

        if response.status() != StatusCode::OK {
            return Err(ProbeError::Status(response.status().as_u16()));
        }

        let header_bytes = headers_len(response.headers());
        let body = response.bytes().await?;
        let latency = start.elapsed();

        let info: IpInfo = serde_json::from_slice(&body)?;
        let bandwidth = request_len(&self.config.probe_url) + header_bytes + body.len() as u64;

        debug!(ip = %info.ip, latency_ms = latency.as_millis() as u64, "probe succeeded");

        let location = info.location();
        Ok(ProbeResult::new(info.ip, location)
            .with_latency(latency)
            .with_bandwidth(bandwidth))
    }
}

fn browser_headers() -> Result<HeaderMap, ProbeError> {
    let mut headers = HeaderMap::new();
    for (name, value) in BROWSER_HEADERS.iter() {
        let value = HeaderValue::from_str(value).map_err(|e| ProbeError::Client(e.to_string()))?;
        headers.insert(HeaderName::from_static(*name), value);
    }
    Ok(headers)
}

/// Wire size of a header block: `name: value\r\n` per entry plus the
/// terminating blank line.
fn headers_len(headers: &HeaderMap) -> u64 {
    let fields: usize = headers
        .iter()
        .map(|(name, value)| name.as_str().len() + value.len() + 4)
        .sum();
    (fields + 2) as u64
}

/// Approximate size of the outgoing request: request line plus the
/// browser header block.
fn request_len(url: &str) -> u64 {
    let request_line = "GET ".len() + url.len() + " HTTP/1.1\r\n".len();
    let fields: usize = BROWSER_HEADERS
        .iter()
        .map(|(name, value)| name.len() + value.len() + 4)
        .sum();
    (request_line + fields + 2) as u64
}
