use mongodb::bson::{doc, Bson, Document};
use sha2::{Digest, Sha256};

use super::field::{BsonKind, Field, FieldNode};

/// Derive the `$jsonSchema` validator for a compiled root object.
///
/// Controller and multilingual annotations have no physical counterpart and are
/// dropped. Every non-root node also admits `null`.
pub fn derive_validator(root: &Field) -> Document {
    doc! { "$jsonSchema": node_schema(root, true) }
}

fn node_schema(field: &Field, is_root: bool) -> Document {
    let mut schema = Document::new();
    let kinds: Vec<BsonKind> = match &field.node {
        FieldNode::Primitive(kind) => vec![*kind],
        FieldNode::Object(_) => vec![BsonKind::Object],
        FieldNode::Array(_) => vec![BsonKind::Array],
        FieldNode::Ambiguous(kinds) => kinds.clone(),
    };

    if is_root {
        schema.insert("bsonType", "object");
    } else {
        let mut tags: Vec<Bson> = kinds.iter().map(|k| Bson::String(k.as_str().to_string())).collect();
        tags.push(Bson::String(BsonKind::Null.as_str().to_string()));
        schema.insert("bsonType", tags);
    }

    match &field.node {
        FieldNode::Object(properties) => {
            let mut props = Document::new();
            for (name, child) in properties {
                props.insert(name.clone(), node_schema(child, false));
            }
            schema.insert("properties", props);
            schema.insert("additionalProperties", false);
        }
        FieldNode::Array(items) => {
            schema.insert("items", node_schema(items, false));
        }
        _ => {}
    }

    if let Some(description) = &field.description {
        schema.insert("description", description.clone());
    }
    schema
}

/// SHA-256 hex digest of the validator's canonical JSON form
pub fn checksum(validator: &Document) -> String {
    let json = Bson::Document(validator.clone()).into_relaxed_extjson();
    let mut hasher = Sha256::new();
    hasher.update(json.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}
