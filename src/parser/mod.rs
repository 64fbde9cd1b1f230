pub mod embedded;
pub mod structured;

pub use embedded::{extract_embedded, schema_types};
pub use structured::{extract_structured, ExtractedPayload, Shape, TypeRecommendation};
