//! Provider-advertised model descriptors.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single model listed by a provider.
///
/// `owned_by` equals the provider name and is the sole authority the
/// [`Manager`](crate::manager::Manager) uses when resolving a model name to a
/// provider (§4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub name: String,
    pub description: Option<String>,
    pub owned_by: String,
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub meta: HashMap<String, serde_json::Value>,
}

impl Model {
    pub fn new(name: impl Into<String>, owned_by: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            owned_by: owned_by.into(),
            created: None,
            meta: HashMap::new(),
        }
    }
}
