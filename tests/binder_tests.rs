use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use switchboard::binder::{
    bind, descriptor_for, BindInput, Bindable, Descriptor, FieldKind, FieldSpec, IntWidth,
};

#[derive(Debug, Deserialize, PartialEq)]
struct AuditQuery {
    id: i64,
    limit: u16,
    active: bool,
    tags: Vec<String>,
    trace: String,
    since: DateTime<Utc>,
    name: String,
    score: f64,
}

impl Bindable for AuditQuery {
    fn descriptor() -> Descriptor {
        Descriptor::new("AuditQuery")
            .field(FieldSpec::path("id", FieldKind::Int(IntWidth::I64)))
            .field(FieldSpec::query("limit", FieldKind::Int(IntWidth::U16)))
            .field(FieldSpec::query("active", FieldKind::Bool))
            .field(FieldSpec::query(
                "tags",
                FieldKind::Seq(Box::new(FieldKind::Str)),
            ))
            .field(FieldSpec::header("trace", FieldKind::Str))
            .field(FieldSpec::query("since", FieldKind::Instant))
            .field(FieldSpec::body("name", FieldKind::Str))
            .field(FieldSpec::body("score", FieldKind::Float))
    }
}

/// Encode a value into the canonical request shape its descriptor
/// describes, decode it back, and require equality.
#[test]
fn binding_round_trips_through_a_canonical_request() {
    let expected = AuditQuery {
        id: -7,
        limit: 512,
        active: true,
        tags: vec!["alpha".to_string(), "beta".to_string()],
        trace: "trace-123".to_string(),
        since: Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap(),
        name: "audit".to_string(),
        score: 2.5,
    };

    let mut path_params = HashMap::new();
    path_params.insert("id".to_string(), expected.id.to_string());

    let query_params = vec![
        ("limit".to_string(), expected.limit.to_string()),
        ("active".to_string(), "true".to_string()),
        ("tags".to_string(), "alpha".to_string()),
        ("tags".to_string(), "beta".to_string()),
        ("since".to_string(), expected.since.to_rfc3339()),
    ];

    let mut headers = HashMap::new();
    headers.insert("trace".to_string(), expected.trace.clone());

    let body = serde_json::json!({ "name": expected.name, "score": expected.score });

    let decoded: AuditQuery = bind(&BindInput {
        path_params: &path_params,
        query_params: &query_params,
        headers: &headers,
        body: Some(&body),
    })
    .unwrap();

    assert_eq!(decoded, expected);
}

#[test]
fn descriptor_lists_every_declared_field() {
    let desc = descriptor_for::<AuditQuery>();
    assert_eq!(desc.fields.len(), 8);
    assert_eq!(desc.body_fields().count(), 2);
    // Memoized: same Arc on repeat lookups.
    assert!(std::sync::Arc::ptr_eq(
        &desc,
        &descriptor_for::<AuditQuery>()
    ));
}

#[test]
fn all_errors_surface_in_one_failure() {
    let path_params = HashMap::new();
    let headers = HashMap::new();
    let query_params = vec![
        ("limit".to_string(), "70000".to_string()),
        ("active".to_string(), "yes".to_string()),
        ("since".to_string(), "march".to_string()),
    ];
    let failure = bind::<AuditQuery>(&BindInput {
        path_params: &path_params,
        query_params: &query_params,
        headers: &headers,
        body: Some(&serde_json::json!({ "name": "x", "score": 1.0 })),
    })
    .unwrap_err();

    let reasons: HashMap<&str, &str> = failure
        .errors
        .iter()
        .map(|e| (e.field.as_str(), e.reason.as_str()))
        .collect();
    assert_eq!(reasons["limit"], "out of range for u16");
    assert_eq!(reasons["active"], "not a boolean");
    assert_eq!(reasons["since"], "not an RFC 3339 timestamp");
    assert_eq!(reasons["id"], "missing required path parameter");
    assert_eq!(reasons["trace"], "missing required header parameter");
    assert_eq!(reasons["tags"], "missing required query parameter");
}
