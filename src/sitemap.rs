use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use quick_xml::events::Event;
use tracing::{debug, info, warn};

use crate::cache::TtlCache;
use crate::error::SitemapError;

/// Sitemap `<loc>` lists, read through a TTL cache keyed by sitemap URL.
pub struct SitemapClient {
    client: reqwest::Client,
    cache: Arc<dyn TtlCache<Vec<String>>>,
    ttl: Duration,
}

impl SitemapClient {
    pub fn new(
        cache: Arc<dyn TtlCache<Vec<String>>>,
        ttl: Duration,
        fetch_timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(fetch_timeout).build()?;
        Ok(Self { client, cache, ttl })
    }

    pub async fn urls(&self, sitemap_url: &str) -> Result<Vec<String>, SitemapError> {
        if let Some(urls) = self.cache.get(sitemap_url) {
            debug!("Sitemap cache hit: {}", sitemap_url);
            return Ok(urls);
        }

        info!("Fetching sitemap: {}", sitemap_url);
        let urls = self.fetch(sitemap_url).await.map_err(|e| {
            warn!("Sitemap {} unavailable: {:#}", sitemap_url, e);
            SitemapError::Unavailable(format!("{:#}", e))
        })?;
        info!("Total URLs in sitemap: {}", urls.len());

        self.cache.set(sitemap_url, urls.clone(), self.ttl);
        Ok(urls)
    }

    async fn fetch(&self, sitemap_url: &str) -> Result<Vec<String>> {
        let resp = self.client.get(sitemap_url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            bail!("HTTP {}", status.as_u16());
        }
        let xml = resp.text().await?;
        parse_urlset(&xml)
    }
}

/// Parse a urlset XML and return all non-empty <loc> URLs.
fn parse_urlset(xml: &str) -> Result<Vec<String>> {
    let mut reader = quick_xml::Reader::from_str(xml);
    let mut urls = Vec::new();
    let mut saw_urlset = false;
    let mut in_url = false;
    let mut in_loc = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"urlset" => saw_urlset = true,
                b"url" => in_url = true,
                b"loc" if in_url => in_loc = true,
                _ => {}
            },
            Ok(Event::Text(e)) if in_loc => push_loc(&mut urls, &e.unescape()?),
            Ok(Event::CData(e)) if in_loc => {
                push_loc(&mut urls, std::str::from_utf8(&e.into_inner())?)
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"loc" => in_loc = false,
                b"url" => in_url = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.into()),
            _ => {}
        }
        buf.clear();
    }

    if !saw_urlset {
        bail!("document has no <urlset>");
    }
    Ok(urls)
}

fn push_loc(urls: &mut Vec<String>, loc: &str) {
    let loc = loc.trim();
    if !loc.is_empty() {
        urls.push(loc.to_string());
    }
}
