use std::collections::BTreeSet;

use mongodb::bson::{Bson, Document};

use super::error::FieldError;
use super::field::{BsonKind, Field, FieldNode};

/// Callbacks for a lockstep walk of a candidate and its field tree
pub trait FieldVisitor {
    /// Called for every key present in the candidate, before its value is inspected
    fn visit_field(&mut self, _path: &str, _field: &Field) -> Result<(), FieldError> {
        Ok(())
    }

    fn visit_leaf(&mut self, path: &str, kind: BsonKind, value: Bson) -> Result<Bson, FieldError>;

    fn visit_ambiguous(&mut self, _path: &str, _kinds: &[BsonKind], value: Bson) -> Result<Bson, FieldError> {
        Ok(value)
    }
}

pub fn join_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", parent, key)
    }
}

/// Human-readable BSON type name for error messages
pub fn type_name(value: &Bson) -> &'static str {
    match value {
        Bson::Boolean(_) => "bool",
        Bson::Int32(_) => "int",
        Bson::Int64(_) => "long",
        Bson::Double(_) => "double",
        Bson::String(_) => "string",
        Bson::ObjectId(_) => "objectId",
        Bson::DateTime(_) => "date",
        Bson::Document(_) => "object",
        Bson::Array(_) => "array",
        Bson::Null => "null",
        _ => "unsupported type",
    }
}

/// Walk a root document against an object field
pub fn walk_document<V: FieldVisitor>(
    visitor: &mut V,
    root: &Field,
    document: Document,
    skip: &BTreeSet<String>,
) -> Result<Document, FieldError> {
    walk_properties(visitor, root, "", document, skip)
}

/// Walk a value against a field, rebuilding it from the visitor's results
pub fn walk<V: FieldVisitor>(
    visitor: &mut V,
    field: &Field,
    path: &str,
    value: Bson,
    skip: &BTreeSet<String>,
) -> Result<Bson, FieldError> {
    if skip.contains(path) {
        return Ok(value);
    }
    visitor.visit_field(path, field)?;

    if matches!(value, Bson::Null) {
        return Ok(value);
    }

    match &field.node {
        FieldNode::Primitive(kind) => visitor.visit_leaf(path, *kind, value),
        FieldNode::Ambiguous(kinds) => visitor.visit_ambiguous(path, kinds, value),
        FieldNode::Object(_) => match value {
            Bson::Document(doc) => Ok(Bson::Document(walk_properties(visitor, field, path, doc, skip)?)),
            other => Err(FieldError::mismatch(path, "object", type_name(&other))),
        },
        FieldNode::Array(items) => match value {
            Bson::Array(elements) => {
                let mut out = Vec::with_capacity(elements.len());
                for (index, element) in elements.into_iter().enumerate() {
                    let element_path = join_path(path, &index.to_string());
                    out.push(walk(visitor, items, &element_path, element, skip)?);
                }
                Ok(Bson::Array(out))
            }
            other => Err(FieldError::mismatch(path, "array", type_name(&other))),
        },
    }
}

fn walk_properties<V: FieldVisitor>(
    visitor: &mut V,
    field: &Field,
    path: &str,
    document: Document,
    skip: &BTreeSet<String>,
) -> Result<Document, FieldError> {
    let properties = match &field.node {
        FieldNode::Object(properties) => properties,
        _ => return Err(FieldError::mismatch(path, "object", "document")),
    };

    let mut out = Document::new();
    for (key, value) in document {
        let child_path = join_path(path, &key);
        let value = match properties.get(&key) {
            Some(child) => walk(visitor, child, &child_path, value, skip)?,
            None if skip.contains(&child_path) => value,
            None if field.multilingual => {
                return Err(FieldError::UnsupportedLanguage {
                    path: path.to_string(),
                    language: key,
                })
            }
            None => return Err(FieldError::UnknownField { path: child_path }),
        };
        out.insert(key, value);
    }
    Ok(out)
}
