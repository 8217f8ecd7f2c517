use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Primitive and structural BSON type tags accepted in definitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BsonKind {
    Bool,
    Int,
    Long,
    Double,
    String,
    ObjectId,
    Date,
    Object,
    Array,
    Null,
}

impl BsonKind {
    pub fn parse(tag: &str) -> Option<Self> {
        Some(match tag {
            "bool" => BsonKind::Bool,
            "int" => BsonKind::Int,
            "long" => BsonKind::Long,
            "double" => BsonKind::Double,
            "string" => BsonKind::String,
            "objectId" => BsonKind::ObjectId,
            "date" => BsonKind::Date,
            "object" => BsonKind::Object,
            "array" => BsonKind::Array,
            "null" => BsonKind::Null,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BsonKind::Bool => "bool",
            BsonKind::Int => "int",
            BsonKind::Long => "long",
            BsonKind::Double => "double",
            BsonKind::String => "string",
            BsonKind::ObjectId => "objectId",
            BsonKind::Date => "date",
            BsonKind::Object => "object",
            BsonKind::Array => "array",
            BsonKind::Null => "null",
        }
    }
}

impl fmt::Display for BsonKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The singular type of a node, or `None` when the allowed set is not exactly one non-null type
pub fn identify_type(kinds: &[BsonKind]) -> Option<BsonKind> {
    let mut non_null = kinds.iter().filter(|k| **k != BsonKind::Null);
    match (non_null.next(), non_null.next()) {
        (Some(kind), None) => Some(*kind),
        _ => None,
    }
}

/// Operations a controller can perform; each field may opt out of any of them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ControllerOperation {
    Read,
    ReadOneById,
    CreateOne,
    UpdateOneByIdAndVersion,
    ReplaceOneByIdAndVersion,
}

impl fmt::Display for ControllerOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ControllerOperation::Read => "read",
            ControllerOperation::ReadOneById => "readOneById",
            ControllerOperation::CreateOne => "createOne",
            ControllerOperation::UpdateOneByIdAndVersion => "updateOneByIdAndVersion",
            ControllerOperation::ReplaceOneByIdAndVersion => "replaceOneByIdAndVersion",
        })
    }
}

/// Per-operation permissions. Unset entries allow the operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ControllerFlags {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_one_by_id: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_one: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_one_by_id_and_version: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace_one_by_id_and_version: Option<bool>,
}

impl ControllerFlags {
    /// Readable and queryable, never writable through a controller
    pub fn read_only() -> Self {
        Self {
            create_one: Some(false),
            update_one_by_id_and_version: Some(false),
            replace_one_by_id_and_version: Some(false),
            ..Default::default()
        }
    }

    /// Entries set here win; unset entries fall back to `defaults`
    pub fn or(self, defaults: Self) -> Self {
        Self {
            read: self.read.or(defaults.read),
            read_one_by_id: self.read_one_by_id.or(defaults.read_one_by_id),
            create_one: self.create_one.or(defaults.create_one),
            update_one_by_id_and_version: self.update_one_by_id_and_version.or(defaults.update_one_by_id_and_version),
            replace_one_by_id_and_version: self.replace_one_by_id_and_version.or(defaults.replace_one_by_id_and_version),
        }
    }

    pub fn allows(&self, operation: ControllerOperation) -> bool {
        let flag = match operation {
            ControllerOperation::Read => self.read,
            ControllerOperation::ReadOneById => self.read_one_by_id,
            ControllerOperation::CreateOne => self.create_one,
            ControllerOperation::UpdateOneByIdAndVersion => self.update_one_by_id_and_version,
            ControllerOperation::ReplaceOneByIdAndVersion => self.replace_one_by_id_and_version,
        };
        flag.unwrap_or(true)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldNode {
    Primitive(BsonKind),
    Object(BTreeMap<String, Field>),
    Array(Box<Field>),
    /// More than one non-null type allowed; values pass through unchanged
    Ambiguous(Vec<BsonKind>),
}

/// A compiled node of a collection's field tree
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub node: FieldNode,
    pub controller: ControllerFlags,
    /// Object keyed by language code, produced by multilingual expansion
    pub multilingual: bool,
    pub nullable: bool,
    pub description: Option<String>,
}

impl Field {
    pub fn primitive(kind: BsonKind) -> Self {
        Self {
            node: FieldNode::Primitive(kind),
            controller: ControllerFlags::default(),
            multilingual: false,
            nullable: false,
            description: None,
        }
    }

    pub fn object(properties: BTreeMap<String, Field>) -> Self {
        Self {
            node: FieldNode::Object(properties),
            ..Self::primitive(BsonKind::Object)
        }
    }

    pub fn with_controller(mut self, controller: ControllerFlags) -> Self {
        self.controller = controller;
        self
    }

    pub fn properties(&self) -> Option<&BTreeMap<String, Field>> {
        match &self.node {
            FieldNode::Object(properties) => Some(properties),
            _ => None,
        }
    }

    /// Descend a dotted path. Numeric segments and array nodes step into `items`.
    pub fn resolve(&self, path: &str) -> Option<&Field> {
        let mut current = self;
        for segment in path.split('.') {
            current = current.child(segment)?;
        }
        Some(current)
    }

    fn child(&self, segment: &str) -> Option<&Field> {
        match &self.node {
            FieldNode::Object(properties) => properties.get(segment),
            FieldNode::Array(items) => {
                if segment.parse::<usize>().is_ok() {
                    Some(items)
                } else {
                    items.child(segment)
                }
            }
            _ => None,
        }
    }
}
