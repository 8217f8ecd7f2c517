use std::collections::BTreeSet;

use mongodb::bson::{Bson, Document};

use crate::schema::walk::{walk_document, FieldVisitor};
use crate::schema::{BsonKind, ControllerOperation, Field, FieldError, Schema};

/// Checks every present candidate key against the schema for one operation.
/// Values are left as they are; coercion happens later in the lifecycle.
pub struct Authorizer {
    operation: ControllerOperation,
}

impl FieldVisitor for Authorizer {
    fn visit_field(&mut self, path: &str, field: &Field) -> Result<(), FieldError> {
        if field.controller.allows(self.operation) {
            Ok(())
        } else {
            Err(FieldError::NotAllowed {
                path: path.to_string(),
                operation: self.operation,
            })
        }
    }

    fn visit_leaf(&mut self, _path: &str, _kind: BsonKind, value: Bson) -> Result<Bson, FieldError> {
        Ok(value)
    }
}

/// Reject unknown keys, keys disallowed for `operation`, unsupported languages and shape mismatches
pub fn authorize_candidate(
    schema: &Schema,
    candidate: &Document,
    operation: ControllerOperation,
    skip: &BTreeSet<String>,
) -> Result<(), FieldError> {
    walk_document(&mut Authorizer { operation }, schema.root(), candidate.clone(), skip)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ControllerFlags, Definition, FieldDefinition, Languages, SchemaOptions};
    use mongodb::bson::doc;

    fn schema() -> Schema {
        let mut definition = Definition::new();
        definition.insert("name".into(), FieldDefinition::new("string"));
        definition.insert(
            "sku".into(),
            FieldDefinition::new("string").controller(ControllerFlags {
                update_one_by_id_and_version: Some(false),
                ..Default::default()
            }),
        );
        definition.insert("title".into(), FieldDefinition::new("string").multilingual());
        let mut address = Definition::new();
        address.insert("city".into(), FieldDefinition::new("string"));
        definition.insert("address".into(), FieldDefinition::object(address));
        let languages = Languages::new(["en", "fr"]).unwrap();
        Schema::define("shop", "items", definition, &languages, SchemaOptions::default()).unwrap()
    }

    #[test]
    fn unknown_and_disallowed_keys_are_rejected() {
        let schema = schema();
        let none = BTreeSet::new();

        let err = authorize_candidate(&schema, &doc! { "name": "a", "extra": "x" }, ControllerOperation::CreateOne, &none)
            .unwrap_err();
        assert_eq!(err, FieldError::UnknownField { path: "extra".into() });

        let err = authorize_candidate(&schema, &doc! { "version": 5 }, ControllerOperation::CreateOne, &none).unwrap_err();
        assert!(matches!(err, FieldError::NotAllowed { ref path, .. } if path == "version"));

        assert!(authorize_candidate(&schema, &doc! { "sku": "x" }, ControllerOperation::CreateOne, &none).is_ok());
        let err = authorize_candidate(&schema, &doc! { "sku": "x" }, ControllerOperation::UpdateOneByIdAndVersion, &none)
            .unwrap_err();
        assert_eq!(err.to_string(), "Field 'sku' is not allowed for updateOneByIdAndVersion");
    }

    #[test]
    fn languages_and_shapes_are_checked() {
        let schema = schema();
        let none = BTreeSet::new();

        assert!(authorize_candidate(&schema, &doc! { "title": { "en": "Hi", "fr": "Salut" } }, ControllerOperation::CreateOne, &none).is_ok());
        let err = authorize_candidate(&schema, &doc! { "title": { "de": "Hallo" } }, ControllerOperation::CreateOne, &none)
            .unwrap_err();
        assert!(matches!(err, FieldError::UnsupportedLanguage { ref language, .. } if language == "de"));

        let err = authorize_candidate(&schema, &doc! { "address": "Paris" }, ControllerOperation::CreateOne, &none).unwrap_err();
        assert_eq!(err.path(), "address");

        let skip: BTreeSet<String> = ["extra".to_string()].into();
        assert!(authorize_candidate(&schema, &doc! { "extra": 1 }, ControllerOperation::CreateOne, &skip).is_ok());
    }
}
