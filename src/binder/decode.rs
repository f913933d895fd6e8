use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::error::{FieldError, HandlerError};

use super::descriptor::{descriptor_for, Bindable, FieldKind, FieldSpec, ParamSource};

/// Borrowed view of one request's decodable inputs.
///
/// Query parameters keep their wire order so repeated keys bind as ordered
/// sequences. Header names are expected lowercased, as produced by the
/// request parser.
#[derive(Debug, Clone, Copy)]
pub struct BindInput<'a> {
    pub path_params: &'a HashMap<String, String>,
    pub query_params: &'a [(String, String)],
    pub headers: &'a HashMap<String, String>,
    pub body: Option<&'a Value>,
}

/// Failed bind carrying every per-field error.
#[derive(Debug, Clone, PartialEq)]
pub struct BindFailure {
    pub errors: Vec<FieldError>,
}

impl From<BindFailure> for HandlerError {
    fn from(failure: BindFailure) -> Self {
        HandlerError::validation(failure.errors)
    }
}

/// Decode a request into `T` per its cached descriptor.
///
/// Every declared field is pulled from its source and decoded; errors
/// accumulate rather than short-circuiting, so a failed bind reports all
/// invalid fields at once. On success the assembled object is materialized
/// through serde.
pub fn bind<T: Bindable>(input: &BindInput<'_>) -> Result<T, BindFailure> {
    let descriptor = descriptor_for::<T>();
    let mut out = Map::with_capacity(descriptor.fields.len());
    let mut errors = Vec::new();

    for field in &descriptor.fields {
        match decode_field(field, input) {
            Ok(Some(value)) => {
                out.insert(field.name.to_string(), value);
            }
            Ok(None) => {}
            Err(err) => errors.push(err),
        }
    }

    if !errors.is_empty() {
        return Err(BindFailure { errors });
    }

    serde_json::from_value(Value::Object(out)).map_err(|e| BindFailure {
        errors: vec![FieldError::new("", "", format!("invalid request shape: {e}"))],
    })
}

/// Decode one field from its declared source. `Ok(None)` means an optional
/// field was absent and should be skipped.
fn decode_field(field: &FieldSpec, input: &BindInput<'_>) -> Result<Option<Value>, FieldError> {
    match field.source {
        ParamSource::Path => {
            decode_single(field, input.path_params.get(field.name).map(String::as_str))
        }
        ParamSource::Header => decode_single(
            field,
            input
                .headers
                .get(&field.name.to_ascii_lowercase())
                .map(String::as_str),
        ),
        ParamSource::Query => decode_query(field, input.query_params),
        ParamSource::Body => decode_body(field, input.body),
    }
}

fn missing(field: &FieldSpec) -> FieldError {
    FieldError::new(
        field.name,
        "",
        format!("missing required {} parameter", field.source),
    )
}

fn decode_single(field: &FieldSpec, raw: Option<&str>) -> Result<Option<Value>, FieldError> {
    let raw = match raw {
        Some(v) => v,
        None if field.required => return Err(missing(field)),
        None => return Ok(None),
    };
    match &field.kind {
        FieldKind::Seq(inner) => decode_seq(field, inner, &split_csv(raw)),
        kind => decode_scalar(kind, raw)
            .map(Some)
            .map_err(|reason| FieldError::new(field.name, raw, reason)),
    }
}

fn decode_query(
    field: &FieldSpec,
    query: &[(String, String)],
) -> Result<Option<Value>, FieldError> {
    let values: Vec<&str> = query
        .iter()
        .filter(|(k, _)| k == field.name)
        .map(|(_, v)| v.as_str())
        .collect();

    match &field.kind {
        FieldKind::Seq(inner) => {
            if values.is_empty() {
                if field.required {
                    return Err(missing(field));
                }
                return Ok(None);
            }
            // A single occurrence is comma-separated; repeated occurrences
            // bind in wire order.
            if values.len() == 1 {
                decode_seq(field, inner, &split_csv(values[0]))
            } else {
                decode_seq(field, inner, &values)
            }
        }
        _ => decode_single(field, values.last().copied()),
    }
}

fn split_csv(raw: &str) -> Vec<&str> {
    raw.split(',').filter(|s| !s.is_empty()).collect()
}

fn decode_seq(
    field: &FieldSpec,
    inner: &FieldKind,
    parts: &[&str],
) -> Result<Option<Value>, FieldError> {
    let mut items = Vec::with_capacity(parts.len());
    for part in parts {
        let decoded = decode_scalar(inner, part.trim())
            .map_err(|reason| FieldError::new(field.name, *part, reason))?;
        items.push(decoded);
    }
    Ok(Some(Value::Array(items)))
}

/// Decode a scalar string per kind. Returns the stable failure reason on
/// mismatch.
fn decode_scalar(kind: &FieldKind, raw: &str) -> Result<Value, String> {
    match kind {
        FieldKind::Bool => match raw {
            "true" | "1" => Ok(Value::Bool(true)),
            "false" | "0" => Ok(Value::Bool(false)),
            _ => Err("not a boolean".to_string()),
        },
        FieldKind::Int(width) => {
            if width.is_unsigned() && width.signed_bounds().is_none() {
                // u64 cannot be range-checked through i64.
                let parsed: u64 = raw
                    .parse()
                    .map_err(|_| "not an integer".to_string())?;
                return Ok(Value::from(parsed));
            }
            let parsed: i64 = raw.parse().map_err(|_| "not an integer".to_string())?;
            let (min, max) = width
                .signed_bounds()
                .unwrap_or((i64::MIN, i64::MAX));
            if parsed < min || parsed > max {
                return Err(format!("out of range for {width}"));
            }
            Ok(Value::from(parsed))
        }
        FieldKind::Float => raw
            .parse::<f64>()
            .map(Value::from)
            .map_err(|_| "not a number".to_string()),
        FieldKind::Str => Ok(Value::String(raw.to_string())),
        FieldKind::Instant => match chrono::DateTime::parse_from_rfc3339(raw) {
            Ok(_) => Ok(Value::String(raw.to_string())),
            Err(_) => Err("not an RFC 3339 timestamp".to_string()),
        },
        FieldKind::Seq(_) => Err("nested sequences are not supported".to_string()),
    }
}

fn decode_body(field: &FieldSpec, body: Option<&Value>) -> Result<Option<Value>, FieldError> {
    let object = match body.and_then(Value::as_object) {
        Some(obj) => obj,
        None => {
            if field.required {
                return Err(FieldError::new(
                    field.name,
                    "",
                    "missing required body parameter",
                ));
            }
            return Ok(None);
        }
    };
    let value = match object.get(field.name) {
        Some(Value::Null) | None => {
            if field.required {
                return Err(missing(field));
            }
            return Ok(None);
        }
        Some(v) => v,
    };
    check_body_value(&field.kind, value)
        .map_err(|reason| FieldError::new(field.name, render(value), reason))?;
    Ok(Some(value.clone()))
}

/// Kind-check a JSON body value without re-encoding it.
fn check_body_value(kind: &FieldKind, value: &Value) -> Result<(), String> {
    match kind {
        FieldKind::Bool => value
            .is_boolean()
            .then_some(())
            .ok_or_else(|| "not a boolean".to_string()),
        FieldKind::Int(width) => {
            if width.is_unsigned() && width.signed_bounds().is_none() {
                return value
                    .as_u64()
                    .map(|_| ())
                    .ok_or_else(|| "not an integer".to_string());
            }
            let parsed = value.as_i64().ok_or_else(|| "not an integer".to_string())?;
            let (min, max) = width.signed_bounds().unwrap_or((i64::MIN, i64::MAX));
            if parsed < min || parsed > max {
                return Err(format!("out of range for {width}"));
            }
            Ok(())
        }
        FieldKind::Float => value
            .as_f64()
            .map(|_| ())
            .ok_or_else(|| "not a number".to_string()),
        FieldKind::Str => value
            .is_string()
            .then_some(())
            .ok_or_else(|| "not a string".to_string()),
        FieldKind::Instant => {
            let raw = value.as_str().ok_or_else(|| "not a string".to_string())?;
            chrono::DateTime::parse_from_rfc3339(raw)
                .map(|_| ())
                .map_err(|_| "not an RFC 3339 timestamp".to_string())
        }
        FieldKind::Seq(inner) => {
            let items = value
                .as_array()
                .ok_or_else(|| "not a sequence".to_string())?;
            for item in items {
                check_body_value(inner, item)?;
            }
            Ok(())
        }
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::{Descriptor, IntWidth};
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct SearchRequest {
        q: String,
        limit: i32,
        active: Option<bool>,
        tags: Option<Vec<String>>,
    }

    impl Bindable for SearchRequest {
        fn descriptor() -> Descriptor {
            Descriptor::new("SearchRequest")
                .field(FieldSpec::query("q", FieldKind::Str))
                .field(FieldSpec::query("limit", FieldKind::Int(IntWidth::I32)))
                .field(FieldSpec::query("active", FieldKind::Bool).optional())
                .field(
                    FieldSpec::query("tags", FieldKind::Seq(Box::new(FieldKind::Str))).optional(),
                )
        }
    }

    fn input<'a>(
        path: &'a HashMap<String, String>,
        query: &'a [(String, String)],
        headers: &'a HashMap<String, String>,
        body: Option<&'a Value>,
    ) -> BindInput<'a> {
        BindInput {
            path_params: path,
            query_params: query,
            headers,
            body,
        }
    }

    #[test]
    fn binds_scalars_and_skips_absent_optionals() {
        let path = HashMap::new();
        let headers = HashMap::new();
        let query = vec![
            ("q".to_string(), "ferris".to_string()),
            ("limit".to_string(), "25".to_string()),
        ];
        let bound: SearchRequest = bind(&input(&path, &query, &headers, None)).unwrap();
        assert_eq!(bound.q, "ferris");
        assert_eq!(bound.limit, 25);
        assert_eq!(bound.active, None);
        assert_eq!(bound.tags, None);
    }

    #[test]
    fn accumulates_all_field_errors() {
        let path = HashMap::new();
        let headers = HashMap::new();
        let query = vec![
            ("limit".to_string(), "abc".to_string()),
            ("active".to_string(), "maybe".to_string()),
        ];
        let err = bind::<SearchRequest>(&input(&path, &query, &headers, None)).unwrap_err();
        assert_eq!(err.errors.len(), 3);
        let limit = err.errors.iter().find(|e| e.field == "limit").unwrap();
        assert_eq!(limit.reason, "not an integer");
        assert_eq!(limit.value, "abc");
        let q = err.errors.iter().find(|e| e.field == "q").unwrap();
        assert_eq!(q.reason, "missing required query parameter");
    }

    #[test]
    fn integer_width_is_bounds_checked() {
        #[derive(Deserialize, Debug)]
        struct Narrow {
            n: i8,
        }
        impl Bindable for Narrow {
            fn descriptor() -> Descriptor {
                Descriptor::new("Narrow").field(FieldSpec::query("n", FieldKind::Int(IntWidth::I8)))
            }
        }
        let path = HashMap::new();
        let headers = HashMap::new();
        let query = vec![("n".to_string(), "300".to_string())];
        let err = bind::<Narrow>(&input(&path, &query, &headers, None)).unwrap_err();
        assert_eq!(err.errors[0].reason, "out of range for i8");
    }

    #[test]
    fn sequence_from_comma_separated_value() {
        let path = HashMap::new();
        let headers = HashMap::new();
        let query = vec![
            ("q".to_string(), "x".to_string()),
            ("limit".to_string(), "1".to_string()),
            ("tags".to_string(), "red,green,blue".to_string()),
        ];
        let bound: SearchRequest = bind(&input(&path, &query, &headers, None)).unwrap();
        assert_eq!(
            bound.tags,
            Some(vec!["red".into(), "green".into(), "blue".into()])
        );
    }

    #[test]
    fn sequence_from_repeated_values_keeps_order() {
        let path = HashMap::new();
        let headers = HashMap::new();
        let query = vec![
            ("q".to_string(), "x".to_string()),
            ("limit".to_string(), "1".to_string()),
            ("tags".to_string(), "zebra".to_string()),
            ("tags".to_string(), "aardvark".to_string()),
        ];
        let bound: SearchRequest = bind(&input(&path, &query, &headers, None)).unwrap();
        assert_eq!(bound.tags, Some(vec!["zebra".into(), "aardvark".into()]));
    }

    #[test]
    fn body_fields_decode_en_bloc() {
        #[derive(Deserialize, Debug)]
        struct CreateUser {
            name: String,
            age: u8,
        }
        impl Bindable for CreateUser {
            fn descriptor() -> Descriptor {
                Descriptor::new("CreateUser")
                    .field(FieldSpec::body("name", FieldKind::Str))
                    .field(FieldSpec::body("age", FieldKind::Int(IntWidth::U8)))
            }
        }
        let path = HashMap::new();
        let headers = HashMap::new();
        let query = vec![];
        let body = serde_json::json!({ "name": "iris", "age": 29 });
        let bound: CreateUser = bind(&input(&path, &query, &headers, Some(&body))).unwrap();
        assert_eq!(bound.name, "iris");
        assert_eq!(bound.age, 29);

        let bad = serde_json::json!({ "name": "iris", "age": 300 });
        let err = bind::<CreateUser>(&input(&path, &query, &headers, Some(&bad))).unwrap_err();
        assert_eq!(err.errors[0].reason, "out of range for u8");
    }

    #[test]
    fn instant_requires_rfc3339() {
        #[derive(Deserialize, Debug)]
        struct Window {
            since: chrono::DateTime<chrono::Utc>,
        }
        impl Bindable for Window {
            fn descriptor() -> Descriptor {
                Descriptor::new("Window").field(FieldSpec::query("since", FieldKind::Instant))
            }
        }
        let path = HashMap::new();
        let headers = HashMap::new();
        let ok = vec![("since".to_string(), "2026-08-01T12:00:00Z".to_string())];
        let bound: Window = bind(&input(&path, &ok, &headers, None)).unwrap();
        assert_eq!(bound.since.timestamp(), 1_785_585_600);

        let bad = vec![("since".to_string(), "yesterday".to_string())];
        let err = bind::<Window>(&input(&path, &bad, &headers, None)).unwrap_err();
        assert_eq!(err.errors[0].reason, "not an RFC 3339 timestamp");
    }
}
