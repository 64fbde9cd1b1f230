use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::{Client, Url};
use tracing::{info, warn};

use crate::error::{AcquisitionError, PipelineError};

const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Where page markup comes from: a URL to fetch or markup supplied inline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentSource {
    Url(String),
    Html(String),
}

impl ContentSource {
    /// Resolve request fields into a source. Exactly one of `url`/`html` must be set.
    pub fn from_parts(url: Option<String>, html: Option<String>) -> Result<Self, PipelineError> {
        match (url, html) {
            (Some(_), Some(_)) => Err(PipelineError::Validation(
                "provide either url or html, not both".into(),
            )),
            (Some(url), None) => {
                let parsed = Url::parse(url.trim())
                    .map_err(|e| PipelineError::Validation(format!("invalid url '{}': {}", url, e)))?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(PipelineError::Validation(format!(
                        "url must be http or https: {}",
                        url
                    )));
                }
                Ok(ContentSource::Url(parsed.to_string()))
            }
            (None, Some(html)) if html.trim().is_empty() => {
                Err(PipelineError::Validation("html must not be empty".into()))
            }
            (None, Some(html)) => Ok(ContentSource::Html(html)),
            (None, None) => Err(PipelineError::Validation("missing url or html".into())),
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            ContentSource::Url(u) => Some(u),
            ContentSource::Html(_) => None,
        }
    }
}

/// One way of turning a URL into raw markup.
#[async_trait]
pub trait FetchStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    async fn fetch(&self, url: &str) -> Result<String, AcquisitionError>;
}

/// Plain HTTP GET. Any non-2xx status is reported as `HttpStatus`.
pub struct HttpFetch {
    name: &'static str,
    client: Client,
}

impl HttpFetch {
    /// Browser-like request headers; the first thing tried.
    pub fn primary(timeout: Duration) -> Result<Self, AcquisitionError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml;q=0.9,*/*;q=0.8"),
        );
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| AcquisitionError::Network(e.to_string()))?;
        Ok(Self { name: "primary", client })
    }

    /// Bare client with library defaults.
    pub fn plain(timeout: Duration) -> Result<Self, AcquisitionError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AcquisitionError::Network(e.to_string()))?;
        Ok(Self { name: "plain", client })
    }
}

#[async_trait]
impl FetchStrategy for HttpFetch {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn fetch(&self, url: &str) -> Result<String, AcquisitionError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AcquisitionError::from_reqwest(&e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AcquisitionError::HttpStatus(status.as_u16()));
        }
        resp.text().await.map_err(|e| AcquisitionError::from_reqwest(&e))
    }
}

/// Ordered fetch strategies, tried until one succeeds.
pub struct Acquirer {
    strategies: Vec<Box<dyn FetchStrategy>>,
    timeout: Duration,
    primary_degraded: bool,
}

impl Acquirer {
    pub fn new(strategies: Vec<Box<dyn FetchStrategy>>, timeout: Duration) -> Self {
        Self {
            strategies,
            timeout,
            primary_degraded: false,
        }
    }

    /// Primary browser-like GET, then one plain GET as fallback.
    pub fn http(timeout: Duration) -> Result<Self, AcquisitionError> {
        let strategies: Vec<Box<dyn FetchStrategy>> = vec![
            Box::new(HttpFetch::primary(timeout)?),
            Box::new(HttpFetch::plain(timeout)?),
        ];
        Ok(Self::new(strategies, timeout))
    }

    /// Skip the first strategy and go straight to the fallback.
    pub fn with_primary_degraded(mut self, degraded: bool) -> Self {
        self.primary_degraded = degraded;
        self
    }

    pub async fn acquire(&self, source: &ContentSource) -> Result<String, AcquisitionError> {
        let url = match source {
            ContentSource::Html(html) => return Ok(html.clone()),
            ContentSource::Url(url) => url,
        };

        let skip = usize::from(self.primary_degraded && self.strategies.len() > 1);
        let chain = &self.strategies[skip..];
        let mut last_err = AcquisitionError::Network("no fetch strategy configured".into());

        for (i, strategy) in chain.iter().enumerate() {
            let start = Instant::now();
            let result = match tokio::time::timeout(self.timeout, strategy.fetch(url)).await {
                Ok(r) => r,
                Err(_) => Err(AcquisitionError::Timeout),
            };
            let elapsed = start.elapsed().as_millis();

            match result {
                Ok(html) => {
                    info!(
                        "Fetched {} via {} ({} bytes, {}ms)",
                        url,
                        strategy.name(),
                        html.len(),
                        elapsed
                    );
                    return Ok(html);
                }
                Err(e) if e.allows_fallback() && i + 1 < chain.len() => {
                    warn!("{} fetch failed for {}: {}, falling back", strategy.name(), url, e);
                    last_err = e;
                }
                Err(e) => {
                    warn!("{} fetch failed for {}: {}", strategy.name(), url, e);
                    return Err(e);
                }
            }
        }

        Err(last_err)
    }
}
