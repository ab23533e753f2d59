use record_dedup_service::dto::Record;
use serde_json::Value;
use std::borrow::Cow;

/// Scores two scalar values in `[0, 100]`.
///
/// Strings are compared position by position after trimming and
/// lower-casing, so an inserted prefix ("smith" vs "xsmith") scores low.
/// This is positional matching, not edit distance.
pub fn value_similarity(a: &Value, b: &Value) -> f64 {
    if strictly_equal(a, b) {
        return 100.0;
    }
    if is_blank(a) || is_blank(b) {
        return 0.0;
    }
    if let (Value::Number(x), Value::Number(y)) = (a, b) {
        if let (Some(x), Some(y)) = (x.as_f64(), y.as_f64()) {
            let max = x.abs().max(y.abs());
            // opposite signs would go negative
            return ((1.0 - (x - y).abs() / max) * 100.0).max(0.0);
        }
    }

    let left: Vec<char> = display_value(a).trim().to_lowercase().chars().collect();
    let right: Vec<char> = display_value(b).trim().to_lowercase().chars().collect();
    if left == right {
        return 100.0;
    }
    let matches = left.iter().zip(&right).filter(|(l, r)| l == r).count();
    let length = left.len().max(right.len());
    matches as f64 / length as f64 * 100.0
}

/// Field weight derived from the field name: 0.5 for id-like names, 2 for
/// name-like names. A field matching both ("user_name_id") weighs 2.
pub fn field_weight(field: &str) -> f64 {
    let lower = field.to_lowercase();
    let mut weight = 1.0;
    if lower.contains("id") {
        weight = 0.5;
    }
    if lower.contains("name") {
        weight = 2.0;
    }
    weight
}

/// Weighted mean of the field similarities over the fields both records
/// carry. Fields present on one side only are ignored. Returns 0 when the
/// records share no field.
pub fn record_similarity(a: &Record, b: &Record) -> f64 {
    let (total, weights) = a
        .iter()
        .filter_map(|(field, left)| b.get(field).map(|right| (field, left, right)))
        .fold((0.0, 0.0), |(total, weights), (field, left, right)| {
            let weight = field_weight(field);
            (total + value_similarity(left, right) * weight, weights + weight)
        });
    if weights > 0.0 {
        total / weights
    } else {
        0.0
    }
}

/// Text form of a value, used for string comparison and canonical keys.
pub fn display_value(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(s) => Cow::Borrowed(s.as_str()),
        Value::Null => Cow::Borrowed("null"),
        Value::Bool(b) => Cow::Borrowed(if *b { "true" } else { "false" }),
        Value::Number(n) => match (n.as_i64(), n.as_u64(), n.as_f64()) {
            (Some(i), _, _) => Cow::Owned(i.to_string()),
            (_, Some(u), _) => Cow::Owned(u.to_string()),
            (_, _, Some(f)) if f.fract() == 0.0 && f.abs() < 1e21 => {
                Cow::Owned(format!("{:.0}", f))
            }
            _ => Cow::Owned(n.to_string()),
        },
        other => Cow::Owned(other.to_string()),
    }
}

fn strictly_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

// null, "", false and 0 carry no signal
fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f == 0.0 || f.is_nan()),
        _ => false,
    }
}
