//! Content checksums for universal records.
//!
//! The checksum covers `{id, app_version, t_created, data, extra}` and never
//! the update timestamp. It is computed over a canonical text encoding: map
//! keys are sorted at every level and integral floats are written as integers,
//! so that key order and a trip through a text encoding do not change it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::{Number, Value};

use crate::record::format_time;

// 2^53, the largest range in which every integer is exactly representable as f64
const EXACT_FLOAT_INTEGERS: f64 = 9_007_199_254_740_992.0;

fn write_number(number: &Number, out: &mut String) {
    if let Some(i) = number.as_i64() {
        out.push_str(&i.to_string());
    } else if let Some(u) = number.as_u64() {
        out.push_str(&u.to_string());
    } else if let Some(f) = number.as_f64() {
        if f.fract() == 0.0 && f.abs() <= EXACT_FLOAT_INTEGERS {
            out.push_str(&(f as i64).to_string());
        } else {
            out.push_str(&f.to_string());
        }
    }
}

fn write_string(text: &str, out: &mut String) {
    // Display of a JSON value is its compact, escaped encoding
    out.push_str(&Value::String(text.to_string()).to_string());
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => write_number(n, out),
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
    }
}

/// Canonical compact JSON encoding of a value.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

/// Computes the checksum of a record's content.
pub fn checksum_of(
    id: &str,
    app_version: u64,
    time_created: &DateTime<Utc>,
    data: &Value,
    extras: &BTreeMap<String, Value>,
) -> String {
    // keys in sorted order: app_version, data, extra, id, t_created
    let mut canonical = String::from("{\"app_version\":");
    canonical.push_str(&app_version.to_string());
    canonical.push_str(",\"data\":");
    write_canonical(data, &mut canonical);
    canonical.push_str(",\"extra\":{");
    for (i, (key, value)) in extras.iter().enumerate() {
        if i > 0 {
            canonical.push(',');
        }
        write_string(key, &mut canonical);
        canonical.push(':');
        write_canonical(value, &mut canonical);
    }
    canonical.push_str("},\"id\":");
    write_string(id, &mut canonical);
    canonical.push_str(",\"t_created\":");
    write_string(&format_time(time_created), &mut canonical);
    canonical.push('}');
    blake3::hash(canonical.as_bytes()).to_hex().to_string()
}
