//! Request and response bodies of the Unified Listing API

use crate::error::FieldError;
use crate::record::{Record, RecordStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

/// `GET /api/products` response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductsResponse {
    #[serde(default)]
    pub products: Vec<Record>,
}

/// Error body returned with non-2xx responses
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default, alias = "error")]
    pub message: Option<String>,
    #[serde(default)]
    pub errors: Vec<FieldError>,
}

/// Filters for `GET /api/products`
///
/// List-valued filters travel as JSON arrays in the query string
/// (`sources=["gari"]`), which is what the API expects.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductQuery {
    pub sources: Vec<String>,
    pub unified: Option<bool>,
    pub limit: Option<usize>,
    pub status: Vec<RecordStatus>,
}

impl ProductQuery {
    /// Per-source records (not unified ones) for `source`
    pub fn for_source(source: impl Into<String>, limit: usize) -> Self {
        Self {
            sources: vec![source.into()],
            unified: Some(false),
            limit: Some(limit),
            status: Vec::new(),
        }
    }

    pub fn to_query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();

        if !self.sources.is_empty() {
            pairs.push(("sources", json_list(self.sources.iter().map(String::as_str))));
        }
        if let Some(unified) = self.unified {
            pairs.push(("unified", unified.to_string()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        if !self.status.is_empty() {
            pairs.push(("status", json_list(self.status.iter().map(RecordStatus::as_str))));
        }

        pairs
    }
}

fn json_list<'a>(items: impl Iterator<Item = &'a str>) -> String {
    serde_json::Value::Array(items.map(|s| serde_json::Value::String(s.to_string())).collect())
        .to_string()
}

/// Which write a record needed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteKind {
    Create,
    Update,
}

impl std::fmt::Display for WriteKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteKind::Create => write!(f, "create"),
            WriteKind::Update => write!(f, "update"),
        }
    }
}
