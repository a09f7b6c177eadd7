use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use utoipa::ToSchema;

use crate::condition::{split_path, unquote_segment};
use crate::error::PolicyError;

// Custom type names may refer to each other; this bounds the chain.
const MAX_TYPE_DEPTH: usize = 32;

/// Schemas keyed by namespace name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespaces {
    namespaces: BTreeMap<String, Schema>,
}

impl Namespaces {
    pub fn from_json_str(text: &str) -> Result<Self, PolicyError> {
        serde_json::from_str(text)
            .map_err(|e| PolicyError::InvalidFormat(format!("invalid schema document: {e}")))
    }

    pub fn get(&self, namespace: &str) -> Option<&Schema> {
        self.namespaces.get(namespace)
    }

    pub fn insert(&mut self, namespace: impl Into<String>, schema: Schema) {
        self.namespaces.insert(namespace.into(), schema);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.namespaces.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.namespaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }
}

/// The entity types, actions and shared types of one namespace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    #[serde(default)]
    pub entity_types: BTreeMap<String, EntityType>,
    #[serde(default)]
    pub actions: BTreeMap<String, ActionType>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub common_types: BTreeMap<String, AttrType>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EntityType {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub member_of_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<AttrType>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActionType {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub member_of: Vec<ActionRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applies_to: Option<AppliesTo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ActionRef {
    pub id: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
}

/// The principal and resource types an action accepts, and its context shape.
/// A missing type list places no restriction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppliesTo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal_types: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_types: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<AttrType>,
}

/// An attribute type as written in the schema document.
///
/// `type_name` is one of the built in kinds or the name of an entry in
/// `commonTypes`. `Record` carries `attributes`, `Set` carries `element`, and
/// `Extension`/`Entity`/`EntityOrCommon` carry `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AttrType {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(no_recursion)]
    pub element: Option<Box<AttrType>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(no_recursion)]
    pub attributes: Option<BTreeMap<String, AttrType>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum AttrKind {
    String,
    #[strum(serialize = "Bool", serialize = "Boolean")]
    Bool,
    Date,
    Numeric,
    Long,
    Extension,
    Record,
    Set,
    Entity,
    EntityOrCommon,
    #[strum(default)]
    Custom(String),
}

impl AttrType {
    pub fn new(type_name: impl Into<String>) -> Self {
        AttrType {
            type_name: type_name.into(),
            name: None,
            required: None,
            element: None,
            attributes: None,
        }
    }

    pub fn record(attributes: impl IntoIterator<Item = (String, AttrType)>) -> Self {
        AttrType {
            attributes: Some(attributes.into_iter().collect()),
            ..AttrType::new("Record")
        }
    }

    pub fn set(element: AttrType) -> Self {
        AttrType {
            element: Some(Box::new(element)),
            ..AttrType::new("Set")
        }
    }

    pub fn kind(&self) -> AttrKind {
        AttrKind::from_str(&self.type_name)
            .unwrap_or_else(|_| AttrKind::Custom(self.type_name.clone()))
    }
}

impl Schema {
    /// The type of a dotted attribute path on an entity type's shape.
    pub fn find_attribute(&self, entity_type: &str, path: &str) -> Option<&AttrType> {
        let shape = self.entity_types.get(entity_type)?.shape.as_ref()?;
        self.lookup(shape, path)
    }

    pub fn find_context_attribute(&self, action: &str, path: &str) -> Option<&AttrType> {
        self.actions.get(action)?.find_context_attribute(self, path)
    }

    /// Follow custom type names through `commonTypes` until a built in kind.
    pub fn resolve<'a>(&'a self, ty: &'a AttrType) -> Option<&'a AttrType> {
        let mut current = ty;
        for _ in 0..MAX_TYPE_DEPTH {
            let name = match current.kind() {
                AttrKind::Custom(name) => name,
                AttrKind::EntityOrCommon => match current.name.as_deref() {
                    Some(name) if self.common_types.contains_key(name) => name.to_string(),
                    _ => return Some(current),
                },
                _ => return Some(current),
            };
            current = self.common_types.get(&name)?;
        }
        None
    }

    fn lookup<'a>(&'a self, root: &'a AttrType, path: &str) -> Option<&'a AttrType> {
        let mut current = root;
        for segment in split_path(path) {
            let segment = unquote_segment(&segment);
            current = self.child(current, &segment)?;
        }
        self.resolve(current)
    }

    fn child<'a>(&'a self, parent: &'a AttrType, name: &str) -> Option<&'a AttrType> {
        let parent = self.resolve(parent)?;
        match parent.kind() {
            AttrKind::Record => parent.attributes.as_ref()?.get(name),
            AttrKind::Set => self.child(parent.element.as_deref()?, name),
            AttrKind::Entity | AttrKind::EntityOrCommon => {
                let shape = self.entity_types.get(parent.name.as_deref()?)?.shape.as_ref()?;
                self.child(shape, name)
            }
            _ => None,
        }
    }
}

impl ActionType {
    pub fn find_context_attribute<'a>(&'a self, schema: &'a Schema, path: &str) -> Option<&'a AttrType> {
        let context = self.applies_to.as_ref()?.context.as_ref()?;
        schema.lookup(context, path)
    }

    pub fn principal_types(&self) -> Option<&[String]> {
        self.applies_to.as_ref()?.principal_types.as_deref()
    }

    pub fn resource_types(&self) -> Option<&[String]> {
        self.applies_to.as_ref()?.resource_types.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    const SCHEMA: &str = include_str!("../../testdata/schema.json");

    fn photo_app() -> Schema {
        let namespaces = Namespaces::from_json_str(SCHEMA).unwrap();
        namespaces.get("PhotoApp").unwrap().clone()
    }

    #[parameterized(
        string = { "String", AttrKind::String },
        bool = { "Bool", AttrKind::Bool },
        boolean = { "Boolean", AttrKind::Bool },
        long = { "Long", AttrKind::Long },
        record = { "Record", AttrKind::Record },
        custom = { "PersonType", AttrKind::Custom("PersonType".to_string()) },
    )]
    fn test_attr_kind(type_name: &str, expected: AttrKind) {
        assert_eq!(AttrType::new(type_name).kind(), expected);
    }

    #[parameterized(
        top_level = { "User", "department", Some("String") },
        nested_record = { "User", "address.city", Some("String") },
        through_common_type = { "User", "person.age", Some("Long") },
        through_set = { "Photo", "tags.label", Some("String") },
        through_entity = { "Photo", "owner.department", Some("String") },
        missing = { "User", "shoeSize", None },
        unknown_type = { "Robot", "department", None },
    )]
    fn test_find_attribute(entity_type: &str, path: &str, expected: Option<&str>) {
        let schema = photo_app();
        let found = schema.find_attribute(entity_type, path);
        assert_eq!(found.map(|t| t.type_name.as_str()), expected);
    }

    #[test]
    fn test_find_context_attribute() {
        let schema = photo_app();
        let found = schema.find_context_attribute("viewPhoto", "authenticated");
        assert_eq!(found.map(|t| t.kind()), Some(AttrKind::Bool));
        assert!(schema.find_context_attribute("viewPhoto", "nope").is_none());
        assert!(schema.find_context_attribute("missing", "authenticated").is_none());
    }

    #[test]
    fn test_common_type_cycle_does_not_resolve() {
        let mut schema = Schema::default();
        schema.common_types.insert("A".into(), AttrType::new("B"));
        schema.common_types.insert("B".into(), AttrType::new("A"));
        assert!(schema.resolve(&AttrType::new("A")).is_none());
    }

    #[test]
    fn test_invalid_schema_document() {
        let err = Namespaces::from_json_str("[1, 2]").unwrap_err();
        assert!(matches!(err, PolicyError::InvalidFormat(_)));
    }
}
