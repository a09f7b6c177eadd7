//! Mapper configuration.

use serde::{Deserialize, Serialize};

use crate::attribute_map::AttributeMap;
use crate::error::PolicyError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpClientOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
}

/// Options recognised by the dialect mappers. Anything else is rejected.
///
/// `http_client`, `disable_retry` and `credential` are carried for the
/// provider that fetches and pushes policies; the mappers themselves only
/// read `attribute_map`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MapperOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_client: Option<HttpClientOptions>,
    #[serde(default, skip_serializing_if = "AttributeMap::is_empty")]
    pub attribute_map: AttributeMap,
    #[serde(default)]
    pub disable_retry: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<serde_json::Value>,
}

impl MapperOptions {
    pub fn with_attribute_map(mut self, map: AttributeMap) -> Self {
        self.attribute_map = map;
        self
    }

    pub fn from_json_str(text: &str) -> Result<Self, PolicyError> {
        serde_json::from_str(text).map_err(|e| PolicyError::InvalidOptions(e.to_string()))
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, PolicyError> {
        serde_json::from_value(value).map_err(|e| PolicyError::InvalidOptions(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_from_json() {
        let options = MapperOptions::from_json_str(
            r#"{
                "http_client": {"timeout_secs": 30, "proxy": "http://proxy:3128"},
                "attribute_map": {"subject.country_code": "country"},
                "disable_retry": true,
                "credential": {"token": "t"}
            }"#,
        )
        .unwrap();
        assert_eq!(options.http_client.unwrap().timeout_secs, Some(30));
        assert_eq!(options.attribute_map.to_provider("subject.country_code"), "country");
        assert!(options.disable_retry);
        assert_eq!(options.credential.unwrap()["token"], "t");
    }

    #[test]
    fn test_options_default_when_empty() {
        let options = MapperOptions::from_value(serde_json::json!({})).unwrap();
        assert_eq!(options, MapperOptions::default());
    }

    #[test]
    fn test_unknown_options_are_rejected() {
        let err = MapperOptions::from_json_str(r#"{"retries": 3}"#).unwrap_err();
        assert!(matches!(err, PolicyError::InvalidOptions(msg) if msg.contains("retries")));

        let err = MapperOptions::from_value(serde_json::json!({"http_client": {"tls": true}}))
            .unwrap_err();
        assert!(matches!(err, PolicyError::InvalidOptions(_)));
    }
}
