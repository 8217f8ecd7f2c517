use std::cmp::Ordering;

use mongodb::bson::Bson;

/// Query operators understood by the document filter language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,

    In,
    Nin,
    All,
    Size,
    ElemMatch,

    Exists,
    Regex,
    Options,
    Not,

    And,
    Or,
    Nor,
}

impl FilterOp {
    pub fn parse(key: &str) -> Option<Self> {
        Some(match key {
            "$eq" => FilterOp::Eq,
            "$ne" => FilterOp::Ne,
            "$gt" => FilterOp::Gt,
            "$gte" => FilterOp::Gte,
            "$lt" => FilterOp::Lt,
            "$lte" => FilterOp::Lte,
            "$in" => FilterOp::In,
            "$nin" => FilterOp::Nin,
            "$all" => FilterOp::All,
            "$size" => FilterOp::Size,
            "$elemMatch" => FilterOp::ElemMatch,
            "$exists" => FilterOp::Exists,
            "$regex" => FilterOp::Regex,
            "$options" => FilterOp::Options,
            "$not" => FilterOp::Not,
            "$and" => FilterOp::And,
            "$or" => FilterOp::Or,
            "$nor" => FilterOp::Nor,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "$eq",
            FilterOp::Ne => "$ne",
            FilterOp::Gt => "$gt",
            FilterOp::Gte => "$gte",
            FilterOp::Lt => "$lt",
            FilterOp::Lte => "$lte",
            FilterOp::In => "$in",
            FilterOp::Nin => "$nin",
            FilterOp::All => "$all",
            FilterOp::Size => "$size",
            FilterOp::ElemMatch => "$elemMatch",
            FilterOp::Exists => "$exists",
            FilterOp::Regex => "$regex",
            FilterOp::Options => "$options",
            FilterOp::Not => "$not",
            FilterOp::And => "$and",
            FilterOp::Or => "$or",
            FilterOp::Nor => "$nor",
        }
    }

    /// Top-level combinators that take an array of sub-filters
    pub fn is_logical(&self) -> bool {
        matches!(self, FilterOp::And | FilterOp::Or | FilterOp::Nor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn apply(&self, ordering: Ordering) -> Ordering {
        match self {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterOrderInfo {
    pub column: String,
    pub sort: SortDirection,
}

/// Numeric view of a BSON value, used for cross-type comparisons (int vs double)
pub fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(*v as f64),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

/// Equality with numeric widening; everything else compares structurally
pub fn bson_eq(a: &Bson, b: &Bson) -> bool {
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Ordering between comparable BSON values. Values of unrelated types are unordered.
pub fn bson_cmp(a: &Bson, b: &Bson) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_f64(a), as_f64(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => Some(x.cmp(y)),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => Some(x.bytes().cmp(&y.bytes())),
        (Bson::Null, Bson::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Rank used when sorting documents holding values of different types
pub fn type_rank(value: Option<&Bson>) -> u8 {
    match value {
        None | Some(Bson::Null) => 0,
        Some(Bson::Int32(_)) | Some(Bson::Int64(_)) | Some(Bson::Double(_)) => 1,
        Some(Bson::String(_)) => 2,
        Some(Bson::Document(_)) => 3,
        Some(Bson::Array(_)) => 4,
        Some(Bson::ObjectId(_)) => 5,
        Some(Bson::Boolean(_)) => 6,
        Some(Bson::DateTime(_)) => 7,
        Some(_) => 8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_operators() {
        assert_eq!(FilterOp::parse("$in"), Some(FilterOp::In));
        assert_eq!(FilterOp::parse("$elemMatch"), Some(FilterOp::ElemMatch));
        assert_eq!(FilterOp::parse("$like"), None);
        assert!(FilterOp::Nor.is_logical());
        assert!(!FilterOp::Not.is_logical());
    }

    #[test]
    fn numeric_values_compare_across_types() {
        assert!(bson_eq(&Bson::Int32(3), &Bson::Double(3.0)));
        assert!(bson_eq(&Bson::Int64(7), &Bson::Int32(7)));
        assert_eq!(bson_cmp(&Bson::Int32(1), &Bson::Double(1.5)), Some(Ordering::Less));
        assert_eq!(bson_cmp(&Bson::String("a".into()), &Bson::Int32(1)), None);
    }
}
