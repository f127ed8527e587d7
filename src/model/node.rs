use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::lenient_string;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeModel {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(default, rename = "type", deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// legacy single-predecessor link, only used when no explicit edge survives
    #[serde(default, alias = "input_from", deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub input_from: Option<String>,
    /// every other field: mode, condition, retry, executor specific settings
    #[serde(flatten)]
    pub config: Map<String, Value>,
}

impl NodeModel {
    pub fn new(id: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            ..Default::default()
        }
    }

    pub fn with_kind(
        mut self,
        kind: &str,
    ) -> Self {
        self.kind = Some(kind.to_string());
        self
    }

    pub fn with_prompt(
        mut self,
        prompt: &str,
    ) -> Self {
        self.prompt = Some(prompt.to_string());
        self
    }

    pub fn with_input_from(
        mut self,
        id: &str,
    ) -> Self {
        self.input_from = Some(id.to_string());
        self
    }

    pub fn with_config(
        mut self,
        key: &str,
        value: Value,
    ) -> Self {
        self.config.insert(key.to_string(), value);
        self
    }
}
