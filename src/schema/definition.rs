use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::error::SchemaError;
use super::field::{identify_type, BsonKind, ControllerFlags, Field, FieldNode};
use super::language::Languages;

/// Declarative field tree, as written in schema files
pub type Definition = BTreeMap<String, FieldDefinition>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TypeSpec {
    Single(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FieldDefinition {
    pub bson_type: TypeSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Definition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<FieldDefinition>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<ControllerFlags>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub multilingual: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FieldDefinition {
    pub fn new(bson_type: &str) -> Self {
        Self {
            bson_type: TypeSpec::Single(bson_type.to_string()),
            properties: None,
            items: None,
            controller: None,
            multilingual: false,
            description: None,
        }
    }

    pub fn any_of(bson_types: &[&str]) -> Self {
        Self {
            bson_type: TypeSpec::Many(bson_types.iter().map(|t| t.to_string()).collect()),
            ..Self::new("null")
        }
    }

    pub fn object(properties: Definition) -> Self {
        Self {
            properties: Some(properties),
            ..Self::new("object")
        }
    }

    pub fn array(items: FieldDefinition) -> Self {
        Self {
            items: Some(Box::new(items)),
            ..Self::new("array")
        }
    }

    pub fn controller(mut self, controller: ControllerFlags) -> Self {
        self.controller = Some(controller);
        self
    }

    pub fn multilingual(mut self) -> Self {
        self.multilingual = true;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    fn kinds(&self, path: &str) -> Result<Vec<BsonKind>, SchemaError> {
        let tags: Vec<&str> = match &self.bson_type {
            TypeSpec::Single(tag) => vec![tag.as_str()],
            TypeSpec::Many(tags) => tags.iter().map(String::as_str).collect(),
        };
        if tags.is_empty() {
            return Err(SchemaError::invalid(path, "bsonType must not be empty"));
        }

        let mut kinds = Vec::with_capacity(tags.len());
        for tag in tags {
            let kind = BsonKind::parse(tag).ok_or_else(|| SchemaError::UnknownType {
                path: path.to_string(),
                bson_type: tag.to_string(),
            })?;
            if kinds.contains(&kind) {
                return Err(SchemaError::invalid(path, format!("bsonType '{}' listed twice", tag)));
            }
            kinds.push(kind);
        }
        if kinds == [BsonKind::Null] {
            return Err(SchemaError::invalid(path, "'null' is only valid alongside another type"));
        }
        Ok(kinds)
    }

    /// Compile into a `Field`, expanding multilingual fields into one entry per language
    pub fn compile(&self, path: &str, languages: &Languages) -> Result<Field, SchemaError> {
        let kinds = self.kinds(path)?;
        let nullable = kinds.contains(&BsonKind::Null);

        let node = match identify_type(&kinds) {
            Some(BsonKind::Object) => {
                if self.items.is_some() {
                    return Err(SchemaError::invalid(path, "object fields cannot declare items"));
                }
                let properties = self
                    .properties
                    .as_ref()
                    .ok_or_else(|| SchemaError::invalid(path, "object fields require properties"))?;
                FieldNode::Object(compile_properties(properties, Some(path), languages)?)
            }
            Some(BsonKind::Array) => {
                if self.properties.is_some() {
                    return Err(SchemaError::invalid(path, "array fields cannot declare properties"));
                }
                let items = self
                    .items
                    .as_ref()
                    .ok_or_else(|| SchemaError::invalid(path, "array fields require items"))?;
                FieldNode::Array(Box::new(items.compile(&format!("{}[]", path), languages)?))
            }
            single => {
                if self.properties.is_some() || self.items.is_some() {
                    return Err(SchemaError::invalid(
                        path,
                        "only object and array fields may declare properties or items",
                    ));
                }
                match single {
                    Some(kind) => FieldNode::Primitive(kind),
                    None => FieldNode::Ambiguous(kinds.into_iter().filter(|k| *k != BsonKind::Null).collect()),
                }
            }
        };

        let controller = self.controller.unwrap_or_default();
        let field = Field {
            node,
            controller,
            multilingual: false,
            nullable,
            description: self.description.clone(),
        };

        if !self.multilingual {
            return Ok(field);
        }

        let translations = languages
            .iter()
            .map(|code| (code.to_string(), field.clone()))
            .collect();
        Ok(Field {
            node: FieldNode::Object(translations),
            controller,
            multilingual: true,
            nullable: true,
            description: self.description.clone(),
        })
    }
}

pub(crate) fn compile_properties(
    definition: &Definition,
    parent: Option<&str>,
    languages: &Languages,
) -> Result<BTreeMap<String, Field>, SchemaError> {
    let mut out = BTreeMap::new();
    for (name, field) in definition {
        let path = match parent {
            Some(parent) => format!("{}.{}", parent, name),
            None => name.clone(),
        };
        if name.is_empty() || name.contains('.') || name.starts_with('$') {
            return Err(SchemaError::invalid(path, "field names must be non-empty and contain no '.' or leading '$'"));
        }
        out.insert(name.clone(), field.compile(&path, languages)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn en_fr() -> Languages {
        Languages::new(["en", "fr"]).unwrap()
    }

    #[test]
    fn parses_yaml_definitions() {
        let yaml = r#"
name:
  bsonType: string
tags:
  bsonType: array
  items:
    bsonType: [string, "null"]
address:
  bsonType: object
  properties:
    city: { bsonType: string }
  controller:
    replaceOneByIdAndVersion: false
"#;
        let definition: Definition = serde_yaml::from_str(yaml).unwrap();
        let compiled = compile_properties(&definition, None, &Languages::default()).unwrap();
        assert!(matches!(compiled["name"].node, FieldNode::Primitive(BsonKind::String)));
        let FieldNode::Array(items) = &compiled["tags"].node else {
            panic!("tags should be an array");
        };
        assert!(items.nullable);
        assert!(compiled["address"].controller.replace_one_by_id_and_version == Some(false));
    }

    #[test]
    fn rejects_malformed_nodes() {
        let languages = Languages::default();
        assert!(FieldDefinition::new("object").compile("a", &languages).is_err());
        assert!(FieldDefinition::new("array").compile("a", &languages).is_err());
        assert!(matches!(
            FieldDefinition::new("decimal").compile("a", &languages),
            Err(SchemaError::UnknownType { .. })
        ));
        assert!(FieldDefinition::new("null").compile("a", &languages).is_err());

        let mut bad = FieldDefinition::new("string");
        bad.items = Some(Box::new(FieldDefinition::new("int")));
        assert!(bad.compile("a", &languages).is_err());
    }

    #[test]
    fn ambiguous_nodes_keep_their_types() {
        let field = FieldDefinition::any_of(&["int", "double", "null"])
            .compile("n", &Languages::default())
            .unwrap();
        assert_eq!(field.node, FieldNode::Ambiguous(vec![BsonKind::Int, BsonKind::Double]));
        assert!(field.nullable);
    }

    #[test]
    fn expands_multilingual_fields_per_language() {
        let field = FieldDefinition::new("string")
            .multilingual()
            .controller(ControllerFlags::read_only())
            .compile("title", &en_fr())
            .unwrap();
        assert!(field.multilingual);
        let properties = field.properties().unwrap();
        assert_eq!(properties.keys().collect::<Vec<_>>(), vec!["en", "fr"]);
        assert_eq!(properties["fr"].node, FieldNode::Primitive(BsonKind::String));
        assert_eq!(properties["fr"].controller, ControllerFlags::read_only());
    }
}
