use mongodb::bson::{Bson, Document};

use super::{coerce_leaf, coerce_value};
use crate::filter::filter_where::is_operator_document;
use crate::filter::FilterOp;
use crate::schema::walk::{join_path, type_name};
use crate::schema::{BsonKind, ControllerOperation, Field, FieldError, FieldNode, Schema};

/// Coerce a query document against a schema.
///
/// Field paths are resolved through the field tree (dotted, through arrays) and,
/// when an operation is given, every node along the path must allow it.
/// Operator operands are coerced to the field's type. A `$query`/`$orderby`
/// wrapper is preserved.
pub fn coerce_query(
    schema: &Schema,
    query: Document,
    operation: Option<ControllerOperation>,
) -> Result<Document, FieldError> {
    if !query.contains_key("$query") {
        return coerce_filter(schema.root(), "", query, operation);
    }

    let mut out = Document::new();
    for (key, value) in query {
        let is_query = key == "$query";
        let is_orderby = key == "$orderby";
        match value {
            Bson::Document(filter) if is_query => {
                out.insert(key, coerce_filter(schema.root(), "", filter, operation)?);
            }
            Bson::Document(order) if is_orderby => {
                for path in order.keys() {
                    resolve_path(schema.root(), "", path, operation)?;
                }
                out.insert(key, order);
            }
            other => {
                return Err(FieldError::invalid(&key, format!("unexpected {} in query wrapper", type_name(&other))))
            }
        }
    }
    Ok(out)
}

fn coerce_filter(
    root: &Field,
    prefix: &str,
    filter: Document,
    operation: Option<ControllerOperation>,
) -> Result<Document, FieldError> {
    let mut out = Document::new();
    for (key, value) in filter {
        if key.starts_with('$') {
            let op = FilterOp::parse(&key).filter(FilterOp::is_logical).ok_or_else(|| {
                FieldError::invalid(prefix, format!("unsupported operator {}", key))
            })?;
            let Bson::Array(clauses) = value else {
                return Err(FieldError::invalid(prefix, format!("{} requires an array", op.as_str())));
            };
            let mut coerced = Vec::with_capacity(clauses.len());
            for clause in clauses {
                match clause {
                    Bson::Document(doc) => coerced.push(Bson::Document(coerce_filter(root, prefix, doc, operation)?)),
                    other => {
                        return Err(FieldError::mismatch(prefix, "object", type_name(&other)));
                    }
                }
            }
            out.insert(key, coerced);
        } else {
            let path = join_path(prefix, &key);
            let field = resolve_path(root, prefix, &key, operation)?;
            out.insert(key, coerce_condition(field, &path, value, operation)?);
        }
    }
    Ok(out)
}

fn coerce_condition(
    field: &Field,
    path: &str,
    condition: Bson,
    operation: Option<ControllerOperation>,
) -> Result<Bson, FieldError> {
    let ops = match condition {
        Bson::Document(ops) if is_operator_document(&ops) => ops,
        Bson::RegularExpression(_) => return Ok(condition),
        other => return coerce_operand(field, path, other),
    };

    let mut out = Document::new();
    for (key, operand) in ops {
        let op = FilterOp::parse(&key)
            .ok_or_else(|| FieldError::invalid(path, format!("unsupported operator {}", key)))?;
        let coerced = match op {
            FilterOp::Eq | FilterOp::Ne | FilterOp::Gt | FilterOp::Gte | FilterOp::Lt | FilterOp::Lte => {
                coerce_operand(field, path, operand)?
            }
            FilterOp::In | FilterOp::Nin | FilterOp::All => match operand {
                Bson::Array(values) => Bson::Array(
                    values
                        .into_iter()
                        .map(|v| match v {
                            Bson::RegularExpression(_) => Ok(v),
                            v => coerce_operand(field, path, v),
                        })
                        .collect::<Result<Vec<_>, _>>()?,
                ),
                other => return Err(FieldError::mismatch(path, "array", type_name(&other))),
            },
            FilterOp::Exists => coerce_leaf(path, BsonKind::Bool, operand)?,
            FilterOp::Size => coerce_leaf(path, BsonKind::Int, operand)?,
            FilterOp::Regex => match operand {
                Bson::String(_) | Bson::RegularExpression(_) => operand,
                other => return Err(FieldError::mismatch(path, "string", type_name(&other))),
            },
            FilterOp::Options => match operand {
                Bson::String(_) => operand,
                other => return Err(FieldError::mismatch(path, "string", type_name(&other))),
            },
            FilterOp::Not => match operand {
                Bson::Document(_) | Bson::RegularExpression(_) => coerce_condition(field, path, operand, operation)?,
                other => return Err(FieldError::mismatch(path, "object", type_name(&other))),
            },
            FilterOp::ElemMatch => {
                let FieldNode::Array(items) = &field.node else {
                    return Err(FieldError::invalid(path, "$elemMatch requires an array field"));
                };
                match operand {
                    Bson::Document(sub) if is_operator_document(&sub) => {
                        coerce_condition(items, path, Bson::Document(sub), operation)?
                    }
                    Bson::Document(sub) => Bson::Document(coerce_filter(items, path, sub, operation)?),
                    other => return Err(FieldError::mismatch(path, "object", type_name(&other))),
                }
            }
            FilterOp::And | FilterOp::Or | FilterOp::Nor => {
                return Err(FieldError::invalid(path, format!("{} is not valid on a field", key)));
            }
        };
        out.insert(key, coerced);
    }
    Ok(Bson::Document(out))
}

/// Resolve every key of a sort document, checking the operation along each path
pub fn authorize_sort(
    schema: &Schema,
    sort: &Document,
    operation: Option<ControllerOperation>,
) -> Result<(), FieldError> {
    for path in sort.keys() {
        resolve_path(schema.root(), "", path, operation)?;
    }
    Ok(())
}

/// Operands compared against an array field match its elements
fn coerce_operand(field: &Field, path: &str, value: Bson) -> Result<Bson, FieldError> {
    match (&field.node, &value) {
        (FieldNode::Array(items), v) if !matches!(v, Bson::Array(_)) => coerce_value(items, path, value),
        _ => coerce_value(field, path, value),
    }
}

fn resolve_path<'a>(
    root: &'a Field,
    prefix: &str,
    path: &str,
    operation: Option<ControllerOperation>,
) -> Result<&'a Field, FieldError> {
    let full = join_path(prefix, path);
    let mut walked = prefix.to_string();
    let mut current = root;

    for segment in path.split('.') {
        let container = current;
        let next = match &container.node {
            FieldNode::Array(items) if segment.parse::<usize>().is_ok() => Some(items.as_ref()),
            FieldNode::Array(items) => match &items.node {
                FieldNode::Object(properties) => properties.get(segment),
                _ => None,
            },
            FieldNode::Object(properties) => properties.get(segment),
            _ => None,
        };
        walked = join_path(&walked, segment);

        current = match next {
            Some(field) => field,
            None if container.multilingual => {
                return Err(FieldError::UnsupportedLanguage {
                    path: full,
                    language: segment.to_string(),
                })
            }
            None => return Err(FieldError::UnknownField { path: full }),
        };

        if let Some(operation) = operation {
            if !current.controller.allows(operation) {
                return Err(FieldError::NotAllowed {
                    path: walked,
                    operation,
                });
            }
        }
    }
    Ok(current)
}
