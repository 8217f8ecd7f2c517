pub mod query;

use std::collections::BTreeSet;

use chrono::{DateTime as ChronoDateTime, NaiveDate, Utc};
use mongodb::bson::{self, oid::ObjectId, Bson, DateTime, Document};

use crate::schema::walk::{self, type_name, FieldVisitor};
use crate::schema::{BsonKind, Field, FieldError, Schema};

pub use query::{authorize_sort, coerce_query};

/// Converts untyped candidate values into store-native BSON per the field tree
pub struct Coercer;

impl FieldVisitor for Coercer {
    fn visit_leaf(&mut self, path: &str, kind: BsonKind, value: Bson) -> Result<Bson, FieldError> {
        coerce_leaf(path, kind, value)
    }
}

/// Coerce a whole candidate document against a schema
pub fn coerce_candidate(schema: &Schema, candidate: Document, skip: &BTreeSet<String>) -> Result<Document, FieldError> {
    walk::walk_document(&mut Coercer, schema.root(), candidate, skip)
}

/// Coerce a single value against a field, e.g. an id taken from a URL
pub fn coerce_value(field: &Field, path: &str, value: Bson) -> Result<Bson, FieldError> {
    walk::walk(&mut Coercer, field, path, value, &BTreeSet::new())
}

/// Convert a JSON request body into a BSON candidate document
pub fn candidate_from_json(value: serde_json::Value) -> Result<Document, FieldError> {
    match bson::to_bson(&value) {
        Ok(Bson::Document(doc)) => Ok(doc),
        Ok(other) => Err(FieldError::mismatch("", "object", type_name(&other))),
        Err(e) => Err(FieldError::invalid("", e.to_string())),
    }
}

pub fn coerce_leaf(path: &str, kind: BsonKind, value: Bson) -> Result<Bson, FieldError> {
    match kind {
        BsonKind::Bool => match value {
            Bson::Boolean(_) => Ok(value),
            Bson::String(s) if s == "true" => Ok(Bson::Boolean(true)),
            Bson::String(s) if s == "false" => Ok(Bson::Boolean(false)),
            other => Err(FieldError::mismatch(path, "bool", type_name(&other))),
        },
        BsonKind::Int => {
            let n = whole_number(path, "int", value)?;
            i32::try_from(n)
                .map(Bson::Int32)
                .map_err(|_| FieldError::invalid(path, format!("{} is out of range for int", n)))
        }
        BsonKind::Long => whole_number(path, "long", value).map(Bson::Int64),
        BsonKind::Double => match value {
            Bson::Double(_) => Ok(value),
            Bson::Int32(n) => Ok(Bson::Double(n as f64)),
            Bson::Int64(n) => Ok(Bson::Double(n as f64)),
            Bson::String(s) => match s.trim().parse::<f64>() {
                Ok(n) if n.is_finite() => Ok(Bson::Double(n)),
                _ => Err(FieldError::invalid(path, format!("'{}' is not a number", s))),
            },
            other => Err(FieldError::mismatch(path, "double", type_name(&other))),
        },
        BsonKind::String => match value {
            Bson::String(_) => Ok(value),
            other => Err(FieldError::mismatch(path, "string", type_name(&other))),
        },
        BsonKind::ObjectId => match value {
            Bson::ObjectId(_) => Ok(value),
            Bson::String(s) => parse_object_id(path, &s).map(Bson::ObjectId),
            other => Err(FieldError::mismatch(path, "objectId", type_name(&other))),
        },
        BsonKind::Date => match value {
            Bson::DateTime(_) => Ok(value),
            Bson::Int64(ms) => Ok(Bson::DateTime(DateTime::from_millis(ms))),
            Bson::Int32(ms) => Ok(Bson::DateTime(DateTime::from_millis(ms as i64))),
            Bson::String(s) => parse_date(path, &s).map(Bson::DateTime),
            other => Err(FieldError::mismatch(path, "date", type_name(&other))),
        },
        BsonKind::Object | BsonKind::Array | BsonKind::Null => {
            Err(FieldError::mismatch(path, kind.as_str(), type_name(&value)))
        }
    }
}

/// Parse a 24-hex identifier, requiring that it re-stringifies to the same text
pub fn parse_object_id(path: &str, input: &str) -> Result<ObjectId, FieldError> {
    let id = ObjectId::parse_str(input)
        .map_err(|_| FieldError::invalid(path, format!("'{}' is not a valid objectId", input)))?;
    if id.to_hex() != input {
        return Err(FieldError::invalid(path, format!("'{}' is not a canonical objectId", input)));
    }
    Ok(id)
}

fn parse_date(path: &str, input: &str) -> Result<DateTime, FieldError> {
    let trimmed = input.trim();
    if let Ok(parsed) = ChronoDateTime::parse_from_rfc3339(trimmed) {
        return Ok(DateTime::from_millis(parsed.with_timezone(&Utc).timestamp_millis()));
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(DateTime::from_millis(midnight.and_utc().timestamp_millis()));
        }
    }
    Err(FieldError::invalid(path, format!("'{}' is not a valid date", input)))
}

fn whole_number(path: &str, expected: &str, value: Bson) -> Result<i64, FieldError> {
    let from_float = |n: f64| -> Result<i64, FieldError> {
        if !n.is_finite() || n.fract() != 0.0 {
            return Err(FieldError::invalid(path, format!("{} is not a whole number", n)));
        }
        if n < i64::MIN as f64 || n >= i64::MAX as f64 {
            return Err(FieldError::invalid(path, format!("{} is out of range for {}", n, expected)));
        }
        Ok(n as i64)
    };

    match value {
        Bson::Int32(n) => Ok(n as i64),
        Bson::Int64(n) => Ok(n),
        Bson::Double(n) => from_float(n),
        Bson::String(s) => {
            let trimmed = s.trim();
            if let Ok(n) = trimmed.parse::<i64>() {
                return Ok(n);
            }
            match trimmed.parse::<f64>() {
                Ok(n) => from_float(n),
                Err(_) => Err(FieldError::invalid(path, format!("'{}' is not a number", s))),
            }
        }
        other => Err(FieldError::mismatch(path, expected, type_name(&other))),
    }
}
