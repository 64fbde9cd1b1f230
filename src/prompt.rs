use std::fmt;

use crate::normalize::FetchResult;

/// Which instruction the model receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskDescriptor {
    Recommend,
    Generate { schema_type: String },
}

/// A fully rendered model instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt(String);

impl Prompt {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn build_prompt(task: &TaskDescriptor, content: &FetchResult) -> Prompt {
    let text = match task {
        TaskDescriptor::Recommend => {
            let label = if content.truncated {
                "page HTML (truncated)"
            } else {
                "page HTML"
            };
            format!(
                "\nYou are an SEO expert. Given the following {label}, identify up to 5 appropriate \
                 Schema.org types (e.g., Article, FAQPage, WebSite, LocalBusiness, Product) that best \
                 fit this content. Return only a JSON array of {{ \"type\": \"...\", \"reason\": \"...\" }} \
                 objects, where \"reason\" is one sentence.\n---\n{html}\n",
                label = label,
                html = content.html,
            )
        }
        TaskDescriptor::Generate { schema_type } => format!(
            "\nYou are an SEO and Schema.org expert. Generate valid JSON-LD for type \"{schema_type}\" \
             based on this HTML. Include every property the type requires and fill them from the page \
             content. Return only a single JSON-LD object with \"@context\": \"https://schema.org\", \
             no commentary.\n\n{html}\n",
            schema_type = schema_type,
            html = content.html,
        ),
    };
    Prompt(text)
}
