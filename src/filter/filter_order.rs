use std::cmp::Ordering;

use mongodb::bson::{Bson, Document};

use super::error::FilterError;
use super::filter_where::lookup;
use super::types::{bson_cmp, type_rank, FilterOrderInfo, SortDirection};

pub struct FilterOrder;

impl FilterOrder {
    /// Parse a sort document such as `{ "createdAt": -1, "name": "asc" }`
    pub fn parse(order: &Document) -> Result<Vec<FilterOrderInfo>, FilterError> {
        let mut out = Vec::with_capacity(order.len());
        for (column, value) in order {
            let sort = match value {
                Bson::Int32(1) | Bson::Int64(1) => SortDirection::Asc,
                Bson::Int32(-1) | Bson::Int64(-1) => SortDirection::Desc,
                Bson::Double(d) if *d == 1.0 => SortDirection::Asc,
                Bson::Double(d) if *d == -1.0 => SortDirection::Desc,
                Bson::String(s) if s.eq_ignore_ascii_case("asc") => SortDirection::Asc,
                Bson::String(s) if s.eq_ignore_ascii_case("desc") => SortDirection::Desc,
                other => {
                    return Err(FilterError::InvalidOrder(format!(
                        "'{}' has invalid direction {}",
                        column, other
                    )))
                }
            };
            out.push(FilterOrderInfo { column: column.clone(), sort });
        }
        Ok(out)
    }

    /// Parse `"name asc, createdAt desc"` or `"-createdAt,name"` into a sort document
    pub fn parse_string(order: &str) -> Result<Document, FilterError> {
        let mut out = Document::new();
        for part in order.split(',') {
            let trimmed = part.trim();
            if trimmed.is_empty() {
                continue;
            }
            let mut it = trimmed.split_whitespace();
            let Some(token) = it.next() else { continue };
            let (column, mut direction) = match token.strip_prefix('-') {
                Some(column) => (column, -1),
                None => (token, 1),
            };
            match it.next() {
                Some(dir) if dir.eq_ignore_ascii_case("desc") => direction = -1,
                Some(dir) if dir.eq_ignore_ascii_case("asc") => direction = 1,
                Some(dir) => return Err(FilterError::InvalidOrder(format!("unknown direction '{}'", dir))),
                None => {}
            }
            if column.is_empty() {
                return Err(FilterError::InvalidOrder(trimmed.to_string()));
            }
            out.insert(column, direction);
        }
        Ok(out)
    }

    /// Rewrite any accepted direction spelling as the store-native `1` / `-1`
    pub fn normalize(order: &Document) -> Result<Document, FilterError> {
        let mut out = Document::new();
        for info in Self::parse(order)? {
            let direction = match info.sort {
                SortDirection::Asc => 1,
                SortDirection::Desc => -1,
            };
            out.insert(info.column, direction);
        }
        Ok(out)
    }

    /// Compare two documents by a parsed sort specification
    pub fn compare(infos: &[FilterOrderInfo], a: &Document, b: &Document) -> Ordering {
        for info in infos {
            let left = lookup(a, &info.column).into_iter().next();
            let right = lookup(b, &info.column).into_iter().next();
            let ordering = match (left, right) {
                (Some(l), Some(r)) => bson_cmp(l, r).unwrap_or_else(|| type_rank(Some(l)).cmp(&type_rank(Some(r)))),
                (l, r) => type_rank(l).cmp(&type_rank(r)),
            };
            let ordering = info.sort.apply(ordering);
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;

    #[test]
    fn parses_numeric_and_named_directions() {
        let infos = FilterOrder::parse(&doc! { "a": 1, "b": -1, "c": "desc" }).unwrap();
        assert_eq!(infos.len(), 3);
        assert_eq!(infos[1].sort, SortDirection::Desc);
        assert_eq!(infos[2].sort, SortDirection::Desc);
        assert!(FilterOrder::parse(&doc! { "a": 2 }).is_err());
    }

    #[test]
    fn normalizes_named_directions() {
        let sort = FilterOrder::normalize(&doc! { "a": "asc", "b": "DESC", "c": -1_i64 }).unwrap();
        assert_eq!(sort, doc! { "a": 1, "b": -1, "c": -1 });
    }

    #[test]
    fn parses_order_strings() {
        let sort = FilterOrder::parse_string("name asc, -createdAt").unwrap();
        assert_eq!(sort, doc! { "name": 1, "createdAt": -1 });
        assert!(FilterOrder::parse_string("name sideways").is_err());
    }

    #[test]
    fn compares_with_missing_values_first() {
        let infos = FilterOrder::parse(&doc! { "n": 1 }).unwrap();
        let mut docs = vec![doc! { "n": 3 }, doc! {}, doc! { "n": 1.5 }];
        docs.sort_by(|a, b| FilterOrder::compare(&infos, a, b));
        assert_eq!(docs, vec![doc! {}, doc! { "n": 1.5 }, doc! { "n": 3 }]);
    }
}
