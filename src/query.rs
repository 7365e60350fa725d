use mongodb::bson::{doc, Bson, Document};
use std::collections::HashMap;

/// Query-string keys with structural meaning; everything else is a
/// candidate field filter.
const RESERVED: &[&str] = &["page", "sort", "limit", "fields"];

pub const DEFAULT_LIMIT: i64 = 100;
pub const MAX_LIMIT: i64 = 100;

/// List-endpoint query contract: field filters with comparison operators
/// (`?price[gte]=500`), multi-key sorting (`?sort=-price,name`), sparse
/// field selection (`?fields=name,price`) and page/limit pagination.
#[derive(Debug, Clone)]
pub struct ApiQuery {
    pub filter: Document,
    pub sort: Document,
    pub projection: Option<Document>,
    pub page: u64,
    pub limit: i64,
    pub skip: u64,
}

impl Default for ApiQuery {
    fn default() -> Self {
        Self {
            filter: Document::new(),
            sort: doc! { "createdAt": -1 },
            projection: None,
            page: 1,
            limit: DEFAULT_LIMIT,
            skip: 0,
        }
    }
}

impl ApiQuery {
    /// Builds a query from raw parameters. Filter keys outside `allowed`
    /// are dropped rather than rejected, so unknown parameters cannot be
    /// smuggled into the store filter.
    pub fn from_params(params: &HashMap<String, String>, allowed: &[&str]) -> Self {
        let mut query = ApiQuery::default();
        let mut operator_filters: HashMap<String, Document> = HashMap::new();

        // HashMap order is arbitrary; sort for a deterministic filter.
        let mut keys: Vec<&String> = params.keys().collect();
        keys.sort();

        for key in keys {
            let raw = &params[key];
            match key.as_str() {
                "sort" => query.sort = parse_sort(raw),
                "fields" => query.projection = parse_fields(raw),
                "page" => {
                    query.page = raw.parse::<u64>().ok().filter(|p| *p >= 1).unwrap_or(1);
                }
                "limit" => {
                    query.limit = raw
                        .parse::<i64>()
                        .ok()
                        .filter(|l| *l >= 1)
                        .unwrap_or(DEFAULT_LIMIT)
                        .min(MAX_LIMIT);
                }
                _ => {
                    let (field, op) = split_operator(key);
                    if RESERVED.contains(&field) || !allowed.contains(&field) {
                        continue;
                    }
                    match op {
                        Some(op) => {
                            operator_filters
                                .entry(field.to_string())
                                .or_default()
                                .insert(op, parse_value(raw));
                        }
                        None => {
                            query.filter.insert(field, parse_value(raw));
                        }
                    }
                }
            }
        }

        let mut op_fields: Vec<(String, Document)> = operator_filters.into_iter().collect();
        op_fields.sort_by(|a, b| a.0.cmp(&b.0));
        for (field, ops) in op_fields {
            query.filter.insert(field, ops);
        }

        // Page is client-supplied and may be astronomically large; the
        // skip must never wrap.
        query.skip = query.page.saturating_sub(1).saturating_mul(query.limit as u64);
        query
    }
}

/// `price[gte]` parses to `("price", Some("$gte"))`; unknown operators
/// invalidate the key entirely.
fn split_operator(key: &str) -> (&str, Option<&'static str>) {
    let Some((field, rest)) = key.split_once('[') else {
        return (key, None);
    };
    let op = match rest.strip_suffix(']') {
        Some("gte") => "$gte",
        Some("gt") => "$gt",
        Some("lte") => "$lte",
        Some("lt") => "$lt",
        _ => return ("", None),
    };
    (field, Some(op))
}

fn parse_sort(raw: &str) -> Document {
    let mut sort = Document::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        match part.strip_prefix('-') {
            Some(field) => sort.insert(field, -1),
            None => sort.insert(part, 1),
        };
    }
    if sort.is_empty() {
        return doc! { "createdAt": -1 };
    }
    sort
}

fn parse_fields(raw: &str) -> Option<Document> {
    let mut projection = Document::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        match part.strip_prefix('-') {
            Some(field) => projection.insert(field, 0),
            None => projection.insert(part, 1),
        };
    }
    (!projection.is_empty()).then_some(projection)
}

/// Applies a `fields` selection to serialized response data, after the
/// typed document has been loaded in full. Inclusion lists keep the named
/// keys plus `id`; exclusion lists remove the named keys. Arrays are
/// filtered element-wise.
pub fn select_fields(value: &mut serde_json::Value, projection: &Document) {
    match value {
        serde_json::Value::Array(items) => {
            for item in items {
                select_fields(item, projection);
            }
        }
        serde_json::Value::Object(map) => {
            let include: Vec<&str> = projection
                .iter()
                .filter(|(_, v)| matches!(v, Bson::Int32(1) | Bson::Int64(1)))
                .map(|(k, _)| k.as_str())
                .collect();
            if include.is_empty() {
                for (key, _) in projection {
                    map.remove(key);
                }
            } else {
                map.retain(|key, _| key == "id" || include.contains(&key.as_str()));
            }
        }
        _ => {}
    }
}

fn parse_value(raw: &str) -> Bson {
    if let Ok(n) = raw.parse::<i64>() {
        return Bson::Int64(n);
    }
    if let Ok(n) = raw.parse::<f64>() {
        return Bson::Double(n);
    }
    match raw {
        "true" => Bson::Boolean(true),
        "false" => Bson::Boolean(false),
        _ => Bson::String(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALLOWED: &[&str] = &["duration", "difficulty", "price", "ratingsAverage"];

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn bracket_operators_become_comparison_documents() {
        let q = ApiQuery::from_params(
            &params(&[("price[gte]", "500"), ("price[lt]", "2000")]),
            ALLOWED,
        );
        assert_eq!(
            q.filter,
            doc! { "price": { "$gte": 500_i64, "$lt": 2000_i64 } }
        );
    }

    #[test]
    fn plain_keys_filter_by_equality() {
        let q = ApiQuery::from_params(&params(&[("difficulty", "easy")]), ALLOWED);
        assert_eq!(q.filter, doc! { "difficulty": "easy" });
    }

    #[test]
    fn keys_outside_allow_list_are_dropped() {
        let q = ApiQuery::from_params(
            &params(&[("secretTour", "false"), ("price", "400")]),
            ALLOWED,
        );
        assert_eq!(q.filter, doc! { "price": 400_i64 });
    }

    #[test]
    fn unknown_operator_drops_the_key() {
        let q = ApiQuery::from_params(&params(&[("price[regex]", "x")]), ALLOWED);
        assert!(q.filter.is_empty());
    }

    #[test]
    fn sort_prefix_controls_direction() {
        let q = ApiQuery::from_params(&params(&[("sort", "-price,ratingsAverage")]), ALLOWED);
        assert_eq!(q.sort, doc! { "price": -1, "ratingsAverage": 1 });
    }

    #[test]
    fn default_sort_is_newest_first() {
        let q = ApiQuery::from_params(&params(&[]), ALLOWED);
        assert_eq!(q.sort, doc! { "createdAt": -1 });
    }

    #[test]
    fn fields_build_a_projection() {
        let q = ApiQuery::from_params(&params(&[("fields", "name,price")]), ALLOWED);
        assert_eq!(q.projection, Some(doc! { "name": 1, "price": 1 }));
    }

    #[test]
    fn pagination_translates_to_skip_and_capped_limit() {
        let q = ApiQuery::from_params(&params(&[("page", "3"), ("limit", "10")]), ALLOWED);
        assert_eq!(q.skip, 20);
        assert_eq!(q.limit, 10);

        let q = ApiQuery::from_params(&params(&[("limit", "500")]), ALLOWED);
        assert_eq!(q.limit, MAX_LIMIT);

        let q = ApiQuery::from_params(&params(&[("page", "0"), ("limit", "-3")]), ALLOWED);
        assert_eq!(q.page, 1);
        assert_eq!(q.limit, DEFAULT_LIMIT);
    }

    #[test]
    fn oversized_page_numbers_saturate_the_skip() {
        let huge = u64::MAX.to_string();
        let q = ApiQuery::from_params(&params(&[("page", &huge), ("limit", "100")]), ALLOWED);
        assert_eq!(q.page, u64::MAX);
        assert_eq!(q.skip, u64::MAX);
    }

    #[test]
    fn select_fields_keeps_included_keys_and_id() {
        let mut value = serde_json::json!([
            { "id": "1", "name": "a", "price": 10, "summary": "s" },
            { "id": "2", "name": "b", "price": 20, "summary": "t" }
        ]);
        select_fields(&mut value, &doc! { "name": 1, "price": 1 });
        assert_eq!(
            value,
            serde_json::json!([
                { "id": "1", "name": "a", "price": 10 },
                { "id": "2", "name": "b", "price": 20 }
            ])
        );
    }

    #[test]
    fn select_fields_removes_excluded_keys() {
        let mut value = serde_json::json!({ "id": "1", "name": "a", "price": 10 });
        select_fields(&mut value, &doc! { "price": 0 });
        assert_eq!(value, serde_json::json!({ "id": "1", "name": "a" }));
    }

    #[test]
    fn numeric_strings_coerce_to_numbers() {
        let q = ApiQuery::from_params(
            &params(&[("ratingsAverage[gte]", "4.5"), ("duration", "7")]),
            ALLOWED,
        );
        assert_eq!(
            q.filter,
            doc! { "duration": 7_i64, "ratingsAverage": { "$gte": 4.5 } }
        );
    }
}
