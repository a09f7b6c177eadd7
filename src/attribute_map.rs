//! Attribute name translation between the canonical form and a dialect.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A fixed dictionary from canonical attribute paths to dialect names.
///
/// `to_provider` looks names up exactly, `to_canonical` ignores case. Names
/// without an entry are returned unchanged in both directions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct AttributeMap {
    provider: BTreeMap<String, String>,
    canonical: BTreeMap<String, String>,
}

impl AttributeMap {
    pub fn new<K: Into<String>, V: Into<String>>(entries: impl IntoIterator<Item = (K, V)>) -> Self {
        let mut map = AttributeMap::default();
        for (canonical, provider) in entries {
            let canonical = canonical.into();
            let provider = provider.into();
            map.canonical
                .insert(provider.to_lowercase(), canonical.clone());
            map.provider.insert(canonical, provider);
        }
        map
    }

    pub fn to_provider(&self, name: &str) -> String {
        self.provider
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    pub fn to_canonical(&self, name: &str) -> String {
        self.canonical
            .get(&name.to_lowercase())
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.provider.is_empty()
    }

    pub fn len(&self) -> usize {
        self.provider.len()
    }
}

impl From<BTreeMap<String, String>> for AttributeMap {
    fn from(entries: BTreeMap<String, String>) -> Self {
        AttributeMap::new(entries)
    }
}

impl From<AttributeMap> for BTreeMap<String, String> {
    fn from(map: AttributeMap) -> Self {
        map.provider
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    fn map() -> AttributeMap {
        AttributeMap::new([
            ("subject.country_code", "country"),
            ("subject.common_name", "request.auth.claims.cn"),
        ])
    }

    #[parameterized(
        mapped = { "subject.country_code", "country" },
        nested = { "subject.common_name", "request.auth.claims.cn" },
        unknown = { "resource.owner", "resource.owner" },
    )]
    fn test_to_provider(canonical: &str, provider: &str) {
        assert_eq!(map().to_provider(canonical), provider);
    }

    #[parameterized(
        exact = { "country", "subject.country_code" },
        upper = { "COUNTRY", "subject.country_code" },
        mixed = { "Request.Auth.Claims.CN", "subject.common_name" },
        unknown = { "Other", "Other" },
    )]
    fn test_to_canonical(provider: &str, canonical: &str) {
        assert_eq!(map().to_canonical(provider), canonical);
    }

    #[test]
    fn test_round_trip_on_known_names() {
        let map = map();
        for name in ["subject.country_code", "subject.common_name", "unknown.name"] {
            assert_eq!(map.to_canonical(&map.to_provider(name)), name);
        }
    }

    #[test]
    fn test_serde_is_a_plain_object() {
        let map: AttributeMap = serde_json::from_str(r#"{"a.b": "ab"}"#).unwrap();
        assert_eq!(map.to_provider("a.b"), "ab");
        assert_eq!(map.len(), 1);
        assert_eq!(serde_json::to_string(&map).unwrap(), r#"{"a.b":"ab"}"#);
    }
}
