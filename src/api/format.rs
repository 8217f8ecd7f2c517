use chrono::{DateTime, SecondsFormat, Utc};
use mongodb::bson::{Bson, Document};
use serde_json::{Map, Number, Value};

/// Render a stored document in the public wire format:
/// ObjectIds as 24-hex strings, dates as RFC 3339, numbers as JSON numbers.
pub fn document_to_api_value(document: &Document) -> Value {
    let mut obj = Map::new();
    for (key, value) in document {
        obj.insert(key.clone(), bson_to_api_value(value));
    }
    Value::Object(obj)
}

pub fn documents_to_api_values(documents: &[Document]) -> Vec<Value> {
    documents.iter().map(document_to_api_value).collect()
}

pub fn bson_to_api_value(value: &Bson) -> Value {
    match value {
        Bson::Null | Bson::Undefined => Value::Null,
        Bson::Boolean(b) => Value::Bool(*b),
        Bson::Int32(n) => Value::from(*n),
        Bson::Int64(n) => Value::from(*n),
        Bson::Double(n) => Number::from_f64(*n).map(Value::Number).unwrap_or(Value::Null),
        Bson::String(s) => Value::String(s.clone()),
        Bson::ObjectId(id) => Value::String(id.to_hex()),
        Bson::DateTime(dt) => DateTime::<Utc>::from_timestamp_millis(dt.timestamp_millis())
            .map(|dt| Value::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true)))
            .unwrap_or(Value::Null),
        Bson::Document(doc) => document_to_api_value(doc),
        Bson::Array(items) => Value::Array(items.iter().map(bson_to_api_value).collect()),
        other => other.clone().into_relaxed_extjson(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::{doc, oid::ObjectId, DateTime as BsonDateTime};
    use serde_json::json;

    #[test]
    fn renders_store_types_for_clients() {
        let id = ObjectId::parse_str("64b7f0a1c2d3e4f5a6b7c8d9").unwrap();
        let document = doc! {
            "_id": id,
            "version": 2_i64,
            "createdAt": BsonDateTime::from_millis(0),
            "tags": ["a", { "n": 1.5 }],
            "note": null,
        };
        assert_eq!(
            document_to_api_value(&document),
            json!({
                "_id": "64b7f0a1c2d3e4f5a6b7c8d9",
                "version": 2,
                "createdAt": "1970-01-01T00:00:00.000Z",
                "tags": ["a", { "n": 1.5 }],
                "note": null,
            })
        );
    }
}
