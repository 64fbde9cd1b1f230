use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::info;

use crate::completion::Completer;
use crate::error::{ErrorBody, PipelineError};
use crate::normalize::{normalize, GENERATE_CAP_BYTES, RECOMMEND_CAP_BYTES};
use crate::parser::{extract_embedded, extract_structured, schema_types, ExtractedPayload, Shape};
use crate::prompt::{build_prompt, TaskDescriptor};
use crate::scraper::{Acquirer, ContentSource};

/// A caller-facing body: success JSON or an error body.
pub type ResponseBody = Result<Value, ErrorBody>;

/// Sequences acquisition, normalization, prompting, completion and extraction.
pub struct Pipeline {
    acquirer: Acquirer,
    completer: Arc<dyn Completer>,
    recommend_cap: Option<usize>,
    generate_cap: Option<usize>,
}

impl Pipeline {
    pub fn new(acquirer: Acquirer, completer: Arc<dyn Completer>) -> Self {
        Self {
            acquirer,
            completer,
            recommend_cap: Some(RECOMMEND_CAP_BYTES),
            generate_cap: Some(GENERATE_CAP_BYTES),
        }
    }

    pub fn with_caps(mut self, recommend: Option<usize>, generate: Option<usize>) -> Self {
        self.recommend_cap = recommend;
        self.generate_cap = generate;
        self
    }

    /// Ask the model for up to five fitting Schema.org types.
    pub async fn recommend_types(
        &self,
        source: &ContentSource,
    ) -> Result<ExtractedPayload, PipelineError> {
        info!("Recommending types for {}", describe(source));
        self.run(source, TaskDescriptor::Recommend, self.recommend_cap, Shape::Types)
            .await
    }

    /// Ask the model for one JSON-LD instance of `schema_type`.
    pub async fn generate_schema(
        &self,
        source: &ContentSource,
        schema_type: &str,
    ) -> Result<ExtractedPayload, PipelineError> {
        let schema_type = schema_type.trim();
        if schema_type.is_empty() {
            return Err(PipelineError::Validation("missing schema type".into()));
        }
        info!("Generating {} JSON-LD for {}", schema_type, describe(source));
        let task = TaskDescriptor::Generate {
            schema_type: schema_type.to_string(),
        };
        self.run(source, task, self.generate_cap, Shape::SchemaObject)
            .await
    }

    async fn run(
        &self,
        source: &ContentSource,
        task: TaskDescriptor,
        cap: Option<usize>,
        shape: Shape,
    ) -> Result<ExtractedPayload, PipelineError> {
        let html = self.acquirer.acquire(source).await?;
        let content = normalize(html, cap);
        if content.truncated {
            info!("HTML truncated to {} bytes for prompt", content.byte_length);
        }
        let prompt = build_prompt(&task, &content);
        let resp = self.completer.complete(prompt).await?;
        Ok(extract_structured(&resp, shape))
    }
}

/// Existing JSON-LD found on a page.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub url: String,
    pub existing_schema: Vec<Value>,
    pub types: Vec<String>,
    pub audited_at: DateTime<Utc>,
}

pub async fn audit_page(acquirer: &Acquirer, url: &str) -> Result<AuditReport, PipelineError> {
    let source = ContentSource::from_parts(Some(url.to_string()), None)?;
    let html = acquirer.acquire(&source).await?;
    let existing_schema = extract_embedded(&html);
    let types = schema_types(&existing_schema);
    info!(
        "Audited {}: {} JSON-LD block(s) [{}]",
        url,
        existing_schema.len(),
        types.join(", ")
    );
    Ok(AuditReport {
        url: url.to_string(),
        existing_schema,
        types,
        audited_at: Utc::now(),
    })
}

/// Aggregate of auditing every page a sitemap lists.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SitemapAudit {
    pub sitemap: String,
    pub pages: usize,
    pub with_schema: usize,
    pub type_counts: BTreeMap<String, usize>,
    pub reports: Vec<AuditReport>,
    pub failures: Vec<AuditFailure>,
}

#[derive(Debug, Serialize)]
pub struct AuditFailure {
    pub url: String,
    #[serde(flatten)]
    pub error: ErrorBody,
}

impl SitemapAudit {
    pub fn new(sitemap: &str) -> Self {
        Self {
            sitemap: sitemap.to_string(),
            pages: 0,
            with_schema: 0,
            type_counts: BTreeMap::new(),
            reports: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn record(&mut self, url: &str, outcome: Result<AuditReport, PipelineError>) {
        self.pages += 1;
        match outcome {
            Ok(report) => {
                if !report.existing_schema.is_empty() {
                    self.with_schema += 1;
                }
                for t in &report.types {
                    *self.type_counts.entry(t.clone()).or_default() += 1;
                }
                self.reports.push(report);
            }
            Err(e) => self.failures.push(AuditFailure {
                url: url.to_string(),
                error: e.to_body(),
            }),
        }
    }
}

pub fn recommend_response(
    url: Option<&str>,
    outcome: Result<ExtractedPayload, PipelineError>,
) -> ResponseBody {
    let recommendations = payload_value(outcome)?;
    let mut body = Map::new();
    if let Some(url) = url {
        body.insert("url".into(), Value::String(url.to_string()));
    }
    body.insert("recommendations".into(), recommendations);
    Ok(Value::Object(body))
}

pub fn generate_response(
    schema_type: &str,
    outcome: Result<ExtractedPayload, PipelineError>,
) -> ResponseBody {
    let json_ld = payload_value(outcome)?;
    Ok(json!({ "type": schema_type, "jsonLd": json_ld }))
}

fn payload_value(outcome: Result<ExtractedPayload, PipelineError>) -> Result<Value, ErrorBody> {
    match outcome.map_err(|e| e.to_body())? {
        ExtractedPayload::Types(types) => Ok(Value::Array(
            types
                .into_iter()
                .map(|t| json!({ "type": t.schema_type, "reason": t.reason }))
                .collect(),
        )),
        ExtractedPayload::SchemaObject(v) => Ok(v),
        ExtractedPayload::ExtractionFailure { raw, reason } => Err(ErrorBody {
            error: "invalid_model_json".to_string(),
            details: Some(reason),
            raw: Some(raw),
        }),
    }
}

fn describe(source: &ContentSource) -> String {
    match source {
        ContentSource::Url(url) => url.clone(),
        ContentSource::Html(html) => format!("inline HTML ({} bytes)", html.len()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::completion::CompletionResponse;
    use crate::error::{AcquisitionError, CompletionError};
    use crate::normalize::TRUNCATION_SENTINEL;
    use crate::parser::TypeRecommendation;
    use crate::prompt::Prompt;
    use crate::scraper::FetchStrategy;
    use crate::test_support::fixture;

    struct StubCompleter {
        reply: Result<String, CompletionError>,
        prompts: Mutex<Vec<String>>,
    }

    impl StubCompleter {
        fn replying(text: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(text.to_string()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn failing(err: CompletionError) -> Arc<Self> {
            Arc::new(Self {
                reply: Err(err),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn last_prompt(&self) -> String {
            self.prompts.lock().unwrap().last().cloned().unwrap_or_default()
        }
    }

    #[async_trait]
    impl Completer for StubCompleter {
        async fn complete(&self, prompt: Prompt) -> Result<CompletionResponse, CompletionError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply.clone().map(CompletionResponse::new)
        }
    }

    struct StubFetch(Result<String, AcquisitionError>);

    #[async_trait]
    impl FetchStrategy for StubFetch {
        fn name(&self) -> &'static str {
            "stub"
        }

        async fn fetch(&self, _url: &str) -> Result<String, AcquisitionError> {
            self.0.clone()
        }
    }

    fn acquirer(results: Vec<Result<&str, AcquisitionError>>) -> Acquirer {
        let strategies: Vec<Box<dyn FetchStrategy>> = results
            .into_iter()
            .map(|r| Box::new(StubFetch(r.map(str::to_string))) as Box<dyn FetchStrategy>)
            .collect();
        Acquirer::new(strategies, Duration::from_secs(1))
    }

    fn html_source(html: &str) -> ContentSource {
        ContentSource::Html(html.to_string())
    }

    fn url_source() -> ContentSource {
        ContentSource::Url("https://example.com/cats".into())
    }

    #[tokio::test]
    async fn recommend_from_inline_html() {
        let completer =
            StubCompleter::replying("```json\n[{\"type\":\"Article\",\"reason\":\"news content\"}]\n```");
        let pipeline = Pipeline::new(acquirer(vec![]), completer.clone());
        let payload = pipeline
            .recommend_types(&html_source("<html><body>Article about cats</body></html>"))
            .await
            .unwrap();
        assert_eq!(
            payload,
            ExtractedPayload::Types(vec![TypeRecommendation {
                schema_type: "Article".into(),
                reason: "news content".into(),
            }])
        );
        assert!(completer.last_prompt().contains("Article about cats"));
    }

    #[tokio::test]
    async fn fallback_html_reaches_the_prompt() {
        let completer = StubCompleter::replying("[]");
        let pipeline = Pipeline::new(
            acquirer(vec![
                Err(AcquisitionError::Network("connection reset".into())),
                Ok("<main>from fallback</main>"),
            ]),
            completer.clone(),
        );
        let payload = pipeline.recommend_types(&url_source()).await.unwrap();
        assert_eq!(payload, ExtractedPayload::Types(vec![]));
        assert!(completer.last_prompt().contains("<main>from fallback</main>"));
    }

    #[tokio::test]
    async fn acquisition_failure_skips_completion() {
        let completer = StubCompleter::replying("[]");
        let pipeline = Pipeline::new(
            acquirer(vec![Err(AcquisitionError::HttpStatus(403)), Ok("unused")]),
            completer.clone(),
        );
        let err = pipeline.recommend_types(&url_source()).await.unwrap_err();
        assert_eq!(err.code(), "fetch_http_status");
        assert!(completer.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn rate_limit_surfaces_as_typed_error() {
        let pipeline = Pipeline::new(
            acquirer(vec![]),
            StubCompleter::failing(CompletionError::RateLimited("HTTP 429".into())),
        );
        let err = pipeline
            .generate_schema(&html_source("<p>x</p>"), "Article")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "completion_rate_limited");
    }

    #[tokio::test]
    async fn generate_recovers_object_from_prose() {
        let completer = StubCompleter::replying(
            "Here is the markup:\n{\"@context\":\"https://schema.org\",\"@type\":\"Product\",\"name\":\"Mug\"}\nLet me know!",
        );
        let pipeline = Pipeline::new(acquirer(vec![]), completer.clone());
        let payload = pipeline
            .generate_schema(&html_source("<h1>Mug</h1>"), " Product ")
            .await
            .unwrap();
        match payload {
            ExtractedPayload::SchemaObject(v) => assert_eq!(v["name"], "Mug"),
            other => panic!("expected object, got {:?}", other),
        }
        assert!(completer.last_prompt().contains("type \"Product\""));
    }

    #[tokio::test]
    async fn generate_caps_large_pages() {
        let completer = StubCompleter::replying("{}");
        let pipeline =
            Pipeline::new(acquirer(vec![]), completer.clone()).with_caps(Some(5120), Some(100));
        let big = format!("<p>{}</p>", "w".repeat(1000));
        pipeline
            .generate_schema(&html_source(&big), "WebPage")
            .await
            .unwrap();
        let prompt = completer.last_prompt();
        assert!(prompt.contains(TRUNCATION_SENTINEL.trim()));
        assert!(!prompt.contains(&big));
    }

    #[tokio::test]
    async fn unbounded_generate_keeps_everything() {
        let completer = StubCompleter::replying("{}");
        let pipeline = Pipeline::new(acquirer(vec![]), completer.clone()).with_caps(None, None);
        let big = format!("<p>{}</p>", "w".repeat(20_000));
        pipeline
            .generate_schema(&html_source(&big), "WebPage")
            .await
            .unwrap();
        assert!(completer.last_prompt().contains(&big));
    }

    #[tokio::test]
    async fn empty_type_is_rejected() {
        let pipeline = Pipeline::new(acquirer(vec![]), StubCompleter::replying("{}"));
        let err = pipeline
            .generate_schema(&html_source("<p/>"), "  ")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_request");
    }

    #[tokio::test]
    async fn garbage_becomes_error_body_with_raw() {
        let pipeline = Pipeline::new(acquirer(vec![]), StubCompleter::replying("I cannot help with that."));
        let outcome = pipeline
            .generate_schema(&html_source("<p>x</p>"), "Event")
            .await;
        let body = generate_response("Event", outcome).unwrap_err();
        assert_eq!(body.error, "invalid_model_json");
        assert_eq!(body.raw.as_deref(), Some("I cannot help with that."));
    }

    #[tokio::test]
    async fn audit_reads_existing_blocks() {
        let page = fixture("article.html");
        let report = audit_page(&acquirer(vec![Ok(page.as_str())]), "https://news.example.com/cats")
            .await
            .unwrap();
        assert_eq!(report.existing_schema.len(), 2);
        assert!(report.types.contains(&"NewsArticle".to_string()));
        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("existingSchema").is_some());
        assert!(json.get("auditedAt").is_some());
    }

    #[tokio::test]
    async fn audit_requires_a_real_url() {
        let err = audit_page(&acquirer(vec![]), "notaurl").await.unwrap_err();
        assert_eq!(err.code(), "invalid_request");
    }

    #[test]
    fn sitemap_audit_tallies() {
        let report = |url: &str, types: &[&str]| AuditReport {
            url: url.to_string(),
            existing_schema: types.iter().map(|t| json!({ "@type": t })).collect(),
            types: types.iter().map(|t| t.to_string()).collect(),
            audited_at: Utc::now(),
        };
        let mut audit = SitemapAudit::new("https://a.com/sitemap.xml");
        audit.record("https://a.com/", Ok(report("https://a.com/", &["WebSite", "Organization"])));
        audit.record("https://a.com/blog", Ok(report("https://a.com/blog", &["WebSite"])));
        audit.record("https://a.com/bare", Ok(report("https://a.com/bare", &[])));
        audit.record("https://a.com/gone", Err(AcquisitionError::HttpStatus(404).into()));

        assert_eq!(audit.pages, 4);
        assert_eq!(audit.with_schema, 2);
        assert_eq!(audit.type_counts["WebSite"], 2);
        assert_eq!(audit.type_counts["Organization"], 1);
        assert_eq!(audit.failures.len(), 1);

        let json = serde_json::to_value(&audit).unwrap();
        assert_eq!(json["failures"][0]["error"], "fetch_http_status");
        assert_eq!(json["withSchema"], 2);
    }

    #[test]
    fn recommend_body_shape() {
        let outcome = Ok(ExtractedPayload::Types(vec![TypeRecommendation {
            schema_type: "FAQPage".into(),
            reason: "questions and answers".into(),
        }]));
        let body = recommend_response(Some("https://a.com/faq"), outcome).unwrap();
        assert_eq!(
            body,
            json!({
                "url": "https://a.com/faq",
                "recommendations": [{ "type": "FAQPage", "reason": "questions and answers" }]
            })
        );
        let body = recommend_response(None, Ok(ExtractedPayload::Types(vec![]))).unwrap();
        assert!(body.get("url").is_none());
    }

    #[test]
    fn pipeline_errors_map_to_codes() {
        let body = recommend_response(None, Err(AcquisitionError::Timeout.into())).unwrap_err();
        assert_eq!(body.error, "fetch_timeout");
        assert!(body.raw.is_none());
    }
}
