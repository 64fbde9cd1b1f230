mod cache;
mod completion;
mod error;
mod normalize;
mod parser;
mod pipeline;
mod prompt;
mod scraper;
mod settings;
mod sitemap;
mod utils;

#[cfg(test)]
mod test_support;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tracing::info;

use cache::MemoryCache;
use completion::OpenAiCompleter;
use error::{ErrorBody, PipelineError};
use pipeline::{audit_page, generate_response, recommend_response, Pipeline, ResponseBody, SitemapAudit};
use scraper::{Acquirer, ContentSource};
use settings::Settings;
use sitemap::SitemapClient;

#[derive(Parser)]
#[command(name = "schema_scout", about = "Schema.org JSON-LD recommendations, generation and audits")]
struct Cli {
    /// Skip the primary fetch strategy and use the plain fallback directly
    #[arg(long, global = true)]
    primary_degraded: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct SourceArgs {
    /// Page to fetch
    #[arg(long)]
    url: Option<String>,
    /// Literal page HTML
    #[arg(long)]
    html: Option<String>,
    /// Read page HTML from a file
    #[arg(long, value_name = "PATH")]
    html_file: Option<PathBuf>,
}

impl SourceArgs {
    fn into_source(self) -> Result<ContentSource, PipelineError> {
        let html = match self.html_file {
            Some(path) => Some(std::fs::read_to_string(&path).map_err(|e| {
                PipelineError::Validation(format!("cannot read {}: {}", path.display(), e))
            })?),
            None => self.html,
        };
        ContentSource::from_parts(self.url, html)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Recommend up to 5 Schema.org types for a page
    Recommend {
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Generate JSON-LD of a given Schema.org type for a page
    Generate {
        #[command(flatten)]
        source: SourceArgs,
        /// Schema.org type, e.g. Article or Product
        #[arg(short = 't', long = "type")]
        schema_type: String,
    },
    /// List the JSON-LD already embedded in a page
    Audit {
        #[arg(long)]
        url: String,
    },
    /// List the page URLs in a sitemap
    Sitemap {
        /// Sitemap URL (default: SCHEMA_SITEMAP_URL)
        #[arg(long)]
        url: Option<String>,
    },
    /// Audit every page listed in a sitemap, one at a time
    AuditSitemap {
        /// Sitemap URL (default: SCHEMA_SITEMAP_URL)
        #[arg(long)]
        url: Option<String>,
        /// Max pages to audit (default: all)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load()?;
    let degraded = cli.primary_degraded || settings.primary_degraded;

    let body: ResponseBody = match cli.command {
        Commands::Recommend { source } => match source.into_source() {
            Ok(src) => {
                let pipeline = build_pipeline(&settings, degraded)?;
                recommend_response(src.url(), pipeline.recommend_types(&src).await)
            }
            Err(e) => Err(e.to_body()),
        },
        Commands::Generate {
            source,
            schema_type,
        } => match source.into_source() {
            Ok(src) => {
                let pipeline = build_pipeline(&settings, degraded)?;
                let outcome = pipeline.generate_schema(&src, &schema_type).await;
                generate_response(schema_type.trim(), outcome)
            }
            Err(e) => Err(e.to_body()),
        },
        Commands::Audit { url } => {
            let acquirer = build_acquirer(&settings, degraded)?;
            match audit_page(&acquirer, &url).await {
                Ok(report) => Ok(serde_json::to_value(&report)?),
                Err(e) => Err(e.to_body()),
            }
        }
        Commands::Sitemap { url } => {
            let url = url.unwrap_or_else(|| settings.sitemap_url.clone());
            match sitemap_client(&settings)?.urls(&url).await {
                Ok(urls) => Ok(json!({ "urls": urls })),
                Err(e) => Err(ErrorBody::from(&e)),
            }
        }
        Commands::AuditSitemap { url, limit } => {
            let url = url.unwrap_or_else(|| settings.sitemap_url.clone());
            match sitemap_client(&settings)?.urls(&url).await {
                Ok(urls) => {
                    let acquirer = build_acquirer(&settings, degraded)?;
                    let pages = match limit {
                        Some(n) => &urls[..n.min(urls.len())],
                        None => &urls[..],
                    };
                    let audit = audit_pages(&acquirer, &url, pages).await?;
                    Ok(serde_json::to_value(&audit)?)
                }
                Err(e) => Err(ErrorBody::from(&e)),
            }
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        info!("Done in {:.1?}", elapsed);
    }

    match body {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(err) => {
            println!("{}", serde_json::to_string_pretty(&err)?);
            std::process::exit(1);
        }
    }
}

fn build_acquirer(settings: &Settings, degraded: bool) -> anyhow::Result<Acquirer> {
    Ok(Acquirer::http(settings.fetch_timeout())?.with_primary_degraded(degraded))
}

fn build_pipeline(settings: &Settings, degraded: bool) -> anyhow::Result<Pipeline> {
    let api_key = settings
        .api_key
        .clone()
        .context("SCHEMA_API_KEY or OPENAI_API_KEY environment variable must be set")?;
    let completer = OpenAiCompleter::new(api_key, settings.api_base.clone(), settings.model.clone())?;
    Ok(
        Pipeline::new(build_acquirer(settings, degraded)?, Arc::new(completer))
            .with_caps(Some(settings.recommend_cap_bytes), settings.generate_cap()),
    )
}

fn sitemap_client(settings: &Settings) -> anyhow::Result<SitemapClient> {
    SitemapClient::new(
        Arc::new(MemoryCache::<Vec<String>>::new()),
        settings.sitemap_ttl(),
        settings.fetch_timeout(),
    )
}

/// Audit pages sequentially so only one outbound fetch is in flight.
async fn audit_pages(
    acquirer: &Acquirer,
    sitemap_url: &str,
    pages: &[String],
) -> anyhow::Result<SitemapAudit> {
    use indicatif::{ProgressBar, ProgressStyle};

    let pb = ProgressBar::new(pages.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let mut audit = SitemapAudit::new(sitemap_url);
    for url in pages {
        let outcome = audit_page(acquirer, url).await;
        audit.record(url, outcome);
        pb.inc(1);
    }
    pb.finish_and_clear();

    info!(
        "Audited {} pages ({} with JSON-LD, {} errors)",
        audit.pages,
        audit.with_schema,
        audit.failures.len()
    );
    Ok(audit)
}
