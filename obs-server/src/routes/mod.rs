//! Route handlers. One module per resource, registered onto the app in
//! `crate::server::build_app`.

pub mod auth;
pub mod chaos;
pub mod health;
pub mod logs;
pub mod metrics;
pub mod replay;
pub mod users;

use std::collections::HashMap;

use obs_db::{ListParams, Order};
use serde_json::Value;

/// Builds a `ListParams` from the common query keys every list endpoint
/// accepts (`limit`, `offset`, `order_by`, `order`, `search`); anything else
/// the caller passes is left for `extract_filters`/`apply_shortcuts`.
pub fn base_list_params(q: &HashMap<String, String>) -> ListParams {
    let mut params = ListParams::default();
    if let Some(limit) = q.get("limit").and_then(|v| v.parse().ok()) {
        params.limit = limit;
    }
    if let Some(offset) = q.get("offset").and_then(|v| v.parse().ok()) {
        params.offset = offset;
    }
    if let Some(order_by) = q.get("order_by") {
        params.order_by = order_by.clone();
    }
    if let Some(order) = q.get("order") {
        params.order = if order.eq_ignore_ascii_case("desc") {
            Order::Desc
        } else {
            Order::Asc
        };
    }
    if let Some(search) = q.get("search") {
        if !search.is_empty() {
            params.search = Some(search.clone());
        }
    }
    params
}

fn coerce_filter_value(raw: &str) -> Value {
    if let Ok(i) = raw.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Value::from(f);
    }
    match raw {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if raw.contains(',') {
        return Value::from(raw.split(',').map(|s| s.to_owned()).collect::<Vec<_>>());
    }
    Value::from(raw.to_owned())
}

/// Pulls every already-canonical `field__op=value` query key into the
/// gateway's filter map.
pub fn extract_filters(q: &HashMap<String, String>) -> HashMap<String, Value> {
    q.iter()
        .filter(|(k, _)| k.contains("__"))
        .map(|(k, v)| (k.clone(), coerce_filter_value(v)))
        .collect()
}

/// Translates resource-specific shortcut query params (`method`,
/// `statusCode`, `startDate`, ...) into canonical `field__op` filter keys.
pub fn apply_shortcuts(
    filters: &mut HashMap<String, Value>,
    q: &HashMap<String, String>,
    mapping: &[(&str, &str)],
) {
    for (shortcut, canonical) in mapping {
        if let Some(raw) = q.get(*shortcut) {
            filters.insert((*canonical).to_owned(), coerce_filter_value(raw));
        }
    }
}

pub fn list_params(q: &HashMap<String, String>, shortcuts: &[(&str, &str)]) -> ListParams {
    let mut params = base_list_params(q);
    let mut filters = extract_filters(q);
    apply_shortcuts(&mut filters, q, shortcuts);
    params.filters = filters;
    params
}
