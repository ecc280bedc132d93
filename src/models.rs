use crate::errors::ApiError;
use std::collections::BTreeMap;
use utoipa::IntoParams;

/// Query parameters accepted by the GET routes.
///
/// ```text
/// limit=10&offset=4                       # pagination
/// order_by=id&desc=true                   # ordering
/// filters[status]=active&filters[tier]=2  # equality filters
/// filters_at=2024-01-01&filters_at=2025   # range filter [from, to)
/// total=true                              # count ignoring pagination
/// preload=orders&preload=orders.product   # eager relation loading
/// ```
///
/// Decoded once per request by [`RequestOptions::from_query`]. Empty filter and
/// preload entries are kept here and dropped when the query is composed.
#[derive(Debug, Clone, Default, PartialEq, Eq, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RequestOptions {
    /// Page size, capped by the route's `limit_max`.
    pub limit: i64,
    /// Number of records to skip.
    pub offset: i64,
    /// Field to order by.
    pub order_by: String,
    /// Order descending instead of ascending.
    #[param(rename = "desc")]
    pub descending: bool,
    /// Equality filters, sent as `filters[<field>]=<value>`.
    pub filters: BTreeMap<String, String>,
    /// Range filter `[from, to)`, sent as two `filters_at` values.
    pub filters_at: Vec<String>,
    /// Relation paths to load, dotted for nested relations.
    pub preload: Vec<String>,
    /// Also return the number of matching records.
    pub total: bool,
}

impl RequestOptions {
    /// Decodes a raw query string. Unknown keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Bind`] when a numeric or boolean parameter does not parse.
    pub fn from_query(query: Option<&str>) -> Result<Self, ApiError> {
        let mut options = Self::default();
        let Some(query) = query else {
            return Ok(options);
        };

        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "limit" => options.limit = parse_int("limit", &value)?,
                "offset" => options.offset = parse_int("offset", &value)?,
                "order_by" => options.order_by = value.into_owned(),
                "desc" => options.descending = parse_bool("desc", &value)?,
                "total" => options.total = parse_bool("total", &value)?,
                "filters_at" => options.filters_at.push(value.into_owned()),
                "preload" => options.preload.push(value.into_owned()),
                other => {
                    if let Some(field) = other
                        .strip_prefix("filters[")
                        .and_then(|rest| rest.strip_suffix(']'))
                    {
                        options.filters.insert(field.to_string(), value.into_owned());
                    }
                }
            }
        }

        Ok(options)
    }
}

fn parse_int(name: &str, value: &str) -> Result<i64, ApiError> {
    if value.is_empty() {
        return Ok(0);
    }
    value
        .trim()
        .parse()
        .map_err(|_| ApiError::bind(format!("invalid value for {name}: '{value}'")))
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ApiError> {
    match value.trim() {
        "" | "0" | "f" | "F" | "false" | "False" | "FALSE" => Ok(false),
        "1" | "t" | "T" | "true" | "True" | "TRUE" => Ok(true),
        _ => Err(ApiError::bind(format!("invalid value for {name}: '{value}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_missing_query_gives_defaults() {
        let options = RequestOptions::from_query(None).unwrap();
        assert_eq!(options, RequestOptions::default());
    }

    #[test]
    fn test_full_query() {
        let options = RequestOptions::from_query(Some(
            "limit=5&offset=10&order_by=name&desc=true&filters%5Bstatus%5D=active\
             &filters[tier]=2&filters_at=2024-01-01&filters_at=2025-01-01\
             &preload=orders&preload=orders.product&total=1",
        ))
        .unwrap();

        assert_eq!(options.limit, 5);
        assert_eq!(options.offset, 10);
        assert_eq!(options.order_by, "name");
        assert!(options.descending);
        assert_eq!(options.filters.get("status").map(String::as_str), Some("active"));
        assert_eq!(options.filters.get("tier").map(String::as_str), Some("2"));
        assert_eq!(options.filters_at, vec!["2024-01-01", "2025-01-01"]);
        assert_eq!(options.preload, vec!["orders", "orders.product"]);
        assert!(options.total);
    }

    #[test]
    fn test_empty_values_are_zero() {
        let options = RequestOptions::from_query(Some("limit=&desc=&filters[status]=")).unwrap();
        assert_eq!(options.limit, 0);
        assert!(!options.descending);
        // Kept here, dropped by the composer.
        assert_eq!(options.filters.get("status").map(String::as_str), Some(""));
    }

    #[test]
    fn test_invalid_limit_is_bind_error() {
        let err = RequestOptions::from_query(Some("limit=ten")).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(matches!(err, ApiError::Bind { .. }));
    }

    #[test]
    fn test_invalid_bool_is_bind_error() {
        assert!(RequestOptions::from_query(Some("total=maybe")).is_err());
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let options = RequestOptions::from_query(Some("sort=name&filters=oops")).unwrap();
        assert_eq!(options, RequestOptions::default());
    }

    #[test]
    fn test_openapi_parameter_names() {
        use utoipa::openapi::path::ParameterIn;

        let names: Vec<String> = RequestOptions::into_params(|| Some(ParameterIn::Query))
            .into_iter()
            .map(|param| param.name)
            .collect();
        for expected in ["limit", "offset", "order_by", "desc", "filters", "filters_at", "preload", "total"] {
            assert!(names.iter().any(|name| name == expected), "missing {expected}");
        }
    }
}
