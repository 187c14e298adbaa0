use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Template is an immutable catalog entry with `{{ placeholder }}` markers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    pub description: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// CreateTemplateRequest for adding a catalog entry
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTemplateRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub body: String,
}

/// TemplatePreviewRequest renders a template without dispatching it
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TemplatePreviewRequest {
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,
}

/// TemplatePreviewResponse carries the rendered output and the parameters it needed
#[derive(Debug, Clone, Serialize)]
pub struct TemplatePreviewResponse {
    pub output: String,
    pub placeholders: Vec<String>,
}
