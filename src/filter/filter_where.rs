use mongodb::bson::{Bson, Document};
use regex::{Regex, RegexBuilder};

use super::error::FilterError;
use super::types::{bson_cmp, bson_eq, FilterOp};
use std::cmp::Ordering;

/// Evaluates MongoDB-style filter documents against in-memory documents
pub struct FilterWhere;

impl FilterWhere {
    /// Check the shape of a filter without evaluating it
    pub fn validate(filter: &Document) -> Result<(), FilterError> {
        for (key, value) in filter {
            if key.starts_with('$') {
                let op = FilterOp::parse(key)
                    .filter(FilterOp::is_logical)
                    .ok_or_else(|| FilterError::UnsupportedOperator(key.clone()))?;
                for sub in Self::sub_filters(op, value)? {
                    Self::validate(sub)?;
                }
            } else {
                Self::validate_condition(key, value)?;
            }
        }
        Ok(())
    }

    fn validate_condition(field: &str, condition: &Bson) -> Result<(), FilterError> {
        let Bson::Document(ops) = condition else {
            return Ok(());
        };
        if !is_operator_document(ops) {
            return Ok(());
        }
        for (key, operand) in ops {
            let op = FilterOp::parse(key)
                .ok_or_else(|| FilterError::UnsupportedOperator(key.clone()))?;
            match op {
                FilterOp::And | FilterOp::Or | FilterOp::Nor => {
                    return Err(FilterError::UnsupportedOperator(format!("{} on field '{}'", key, field)));
                }
                FilterOp::In | FilterOp::Nin | FilterOp::All => {
                    if !matches!(operand, Bson::Array(_)) {
                        return Err(FilterError::InvalidOperatorData(format!("{} requires array", key)));
                    }
                }
                FilterOp::Size => {
                    if super::types::as_f64(operand).is_none() {
                        return Err(FilterError::InvalidOperatorData("$size requires a number".to_string()));
                    }
                }
                FilterOp::Not => match operand {
                    Bson::Document(_) => Self::validate_condition(field, operand)?,
                    Bson::RegularExpression(_) => {}
                    _ => return Err(FilterError::InvalidOperatorData("$not requires an operator document".to_string())),
                },
                FilterOp::ElemMatch => match operand {
                    Bson::Document(sub) if is_operator_document(sub) => Self::validate_condition(field, operand)?,
                    Bson::Document(sub) => Self::validate(sub)?,
                    _ => return Err(FilterError::InvalidOperatorData("$elemMatch requires a document".to_string())),
                },
                FilterOp::Regex => {
                    compile_regex(operand, ops.get_str("$options").unwrap_or(""))?;
                }
                FilterOp::Options => {
                    if !ops.contains_key("$regex") {
                        return Err(FilterError::InvalidOperatorData("$options requires $regex".to_string()));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Evaluate a filter against a single document
    pub fn matches(filter: &Document, document: &Document) -> Result<bool, FilterError> {
        for (key, value) in filter {
            let matched = if key.starts_with('$') {
                let op = FilterOp::parse(key)
                    .filter(FilterOp::is_logical)
                    .ok_or_else(|| FilterError::UnsupportedOperator(key.clone()))?;
                let subs = Self::sub_filters(op, value)?;
                let mut results = Vec::with_capacity(subs.len());
                for sub in subs {
                    results.push(Self::matches(sub, document)?);
                }
                match op {
                    FilterOp::And => results.iter().all(|r| *r),
                    FilterOp::Or => results.iter().any(|r| *r),
                    _ => !results.iter().any(|r| *r),
                }
            } else {
                let values = lookup(document, key);
                Self::matches_condition(&values, value)?
            };

            if !matched {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn sub_filters(op: FilterOp, value: &Bson) -> Result<Vec<&Document>, FilterError> {
        let arr = match value {
            Bson::Array(arr) if !arr.is_empty() => arr,
            _ => {
                return Err(FilterError::InvalidOperatorData(format!(
                    "{} requires a non-empty array",
                    op.as_str()
                )))
            }
        };
        arr.iter()
            .map(|v| match v {
                Bson::Document(doc) => Ok(doc),
                _ => Err(FilterError::InvalidOperatorData(format!(
                    "{} entries must be documents",
                    op.as_str()
                ))),
            })
            .collect()
    }

    fn matches_condition(values: &[&Bson], condition: &Bson) -> Result<bool, FilterError> {
        match condition {
            Bson::Document(ops) if is_operator_document(ops) => {
                for (key, operand) in ops {
                    if !Self::matches_operator(key, operand, ops, values)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Bson::RegularExpression(re) => {
                let regex = compile_regex(condition, &re.options)?;
                Ok(matches_regex(&regex, values))
            }
            expected => Ok(matches_eq(values, expected)),
        }
    }

    fn matches_operator(
        key: &str,
        operand: &Bson,
        ops: &Document,
        values: &[&Bson],
    ) -> Result<bool, FilterError> {
        let op = FilterOp::parse(key).ok_or_else(|| FilterError::UnsupportedOperator(key.to_string()))?;
        Ok(match op {
            FilterOp::Eq => matches_eq(values, operand),
            FilterOp::Ne => !matches_eq(values, operand),
            FilterOp::Gt => matches_cmp(values, operand, |o| o == Ordering::Greater),
            FilterOp::Gte => matches_cmp(values, operand, |o| o != Ordering::Less),
            FilterOp::Lt => matches_cmp(values, operand, |o| o == Ordering::Less),
            FilterOp::Lte => matches_cmp(values, operand, |o| o != Ordering::Greater),
            FilterOp::In => operand_array(key, operand)?.iter().any(|e| matches_eq(values, e)),
            FilterOp::Nin => !operand_array(key, operand)?.iter().any(|e| matches_eq(values, e)),
            FilterOp::All => operand_array(key, operand)?.iter().all(|e| matches_eq(values, e)),
            FilterOp::Size => {
                let size = super::types::as_f64(operand)
                    .ok_or_else(|| FilterError::InvalidOperatorData("$size requires a number".to_string()))?;
                values
                    .iter()
                    .any(|v| matches!(v, Bson::Array(items) if items.len() as f64 == size))
            }
            FilterOp::Exists => truthy(operand) == !values.is_empty(),
            FilterOp::Regex => {
                let regex = compile_regex(operand, ops.get_str("$options").unwrap_or(""))?;
                matches_regex(&regex, values)
            }
            FilterOp::Options => true,
            FilterOp::Not => !Self::matches_condition(values, operand)?,
            FilterOp::ElemMatch => {
                let Bson::Document(sub) = operand else {
                    return Err(FilterError::InvalidOperatorData("$elemMatch requires a document".to_string()));
                };
                let mut found = false;
                for value in values {
                    let Bson::Array(items) = value else { continue };
                    for item in items {
                        let hit = match item {
                            Bson::Document(doc) if !is_operator_document(sub) => Self::matches(sub, doc)?,
                            other => Self::matches_condition(&[other], operand)?,
                        };
                        if hit {
                            found = true;
                            break;
                        }
                    }
                    if found {
                        break;
                    }
                }
                found
            }
            FilterOp::And | FilterOp::Or | FilterOp::Nor => {
                return Err(FilterError::UnsupportedOperator(key.to_string()))
            }
        })
    }
}

/// A document whose keys are all `$` operators, as opposed to an embedded-document literal
pub fn is_operator_document(doc: &Document) -> bool {
    !doc.is_empty() && doc.keys().all(|k| k.starts_with('$'))
}

/// Values reachable at a dotted path, descending through arrays of documents
pub fn lookup<'a>(document: &'a Document, path: &str) -> Vec<&'a Bson> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    if let Some((head, rest)) = segments.split_first() {
        if let Some(value) = document.get(*head) {
            collect(value, rest, &mut out);
        }
    }
    out
}

fn collect<'a>(current: &'a Bson, segments: &[&str], out: &mut Vec<&'a Bson>) {
    let Some((head, rest)) = segments.split_first() else {
        out.push(current);
        return;
    };
    match current {
        Bson::Document(doc) => {
            if let Some(next) = doc.get(*head) {
                collect(next, rest, out);
            }
        }
        Bson::Array(items) => {
            if let Ok(index) = head.parse::<usize>() {
                if let Some(next) = items.get(index) {
                    collect(next, rest, out);
                }
            } else {
                for item in items.iter().filter(|i| matches!(i, Bson::Document(_))) {
                    collect(item, segments, out);
                }
            }
        }
        _ => {}
    }
}

fn operand_array<'a>(key: &str, operand: &'a Bson) -> Result<&'a Vec<Bson>, FilterError> {
    match operand {
        Bson::Array(arr) => Ok(arr),
        _ => Err(FilterError::InvalidOperatorData(format!("{} requires array", key))),
    }
}

fn matches_eq(values: &[&Bson], expected: &Bson) -> bool {
    if matches!(expected, Bson::Null) && values.is_empty() {
        return true;
    }
    values.iter().any(|v| {
        bson_eq(v, expected)
            || matches!(v, Bson::Array(items) if items.iter().any(|i| bson_eq(i, expected)))
    })
}

fn matches_cmp(values: &[&Bson], operand: &Bson, pred: impl Fn(Ordering) -> bool) -> bool {
    values.iter().any(|v| match v {
        Bson::Array(items) => items
            .iter()
            .any(|i| bson_cmp(i, operand).map_or(false, &pred)),
        other => bson_cmp(other, operand).map_or(false, &pred),
    })
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Null => false,
        other => super::types::as_f64(other).map_or(true, |n| n != 0.0),
    }
}

fn compile_regex(pattern: &Bson, options: &str) -> Result<Regex, FilterError> {
    let (source, options) = match pattern {
        Bson::String(s) => (s.as_str(), options.to_string()),
        Bson::RegularExpression(re) => (re.pattern.as_str(), format!("{}{}", re.options, options)),
        _ => return Err(FilterError::InvalidOperatorData("$regex requires a string".to_string())),
    };
    RegexBuilder::new(source)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .ignore_whitespace(options.contains('x'))
        .build()
        .map_err(|e| FilterError::InvalidRegex(e.to_string()))
}

fn matches_regex(regex: &Regex, values: &[&Bson]) -> bool {
    values.iter().any(|v| match v {
        Bson::String(s) => regex.is_match(s),
        Bson::Array(items) => items
            .iter()
            .any(|i| matches!(i, Bson::String(s) if regex.is_match(s))),
        _ => false,
    })
}
