use serde::{Deserialize, Serialize};

use super::lenient_string;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeModel {
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub source: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub target: Option<String>,
    #[serde(default, alias = "source_port", alias = "sourceHandle", deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub source_port: Option<String>,
    #[serde(default, alias = "target_port", alias = "targetHandle", deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub target_port: Option<String>,
}

impl EdgeModel {
    pub fn new(
        source: &str,
        target: &str,
    ) -> Self {
        Self {
            source: Some(source.to_string()),
            target: Some(target.to_string()),
            ..Default::default()
        }
    }

    pub fn with_id(
        mut self,
        id: &str,
    ) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn with_ports(
        mut self,
        source_port: Option<&str>,
        target_port: Option<&str>,
    ) -> Self {
        self.source_port = source_port.map(str::to_string);
        self.target_port = target_port.map(str::to_string);
        self
    }
}
