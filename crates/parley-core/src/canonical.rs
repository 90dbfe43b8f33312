//! Canonical JSON for deterministic signing
//!
//! Receipts and signed claim bundles are hashed and signed over a canonical
//! byte encoding: object keys sorted lexicographically, no insignificant
//! whitespace, standard JSON escaping. Equal values always serialize to
//! identical bytes regardless of field insertion order, which is the whole
//! tamper-evidence contract.
//!
//! Numbers: integers render through `i64`/`u64`; finite doubles render via
//! `ryu` shortest form. Non-finite numbers are rejected. Protocol payloads
//! are strings, integers and booleans, so no cross-language float
//! normalization beyond shortest-form is required.

use serde_json::Value;

use crate::error::{Error, Result};

/// Canonicalize a JSON value into its deterministic string form.
pub fn canonicalize(value: &Value) -> Result<String> {
    let mut out = String::new();
    write_value(value, &mut out)?;
    Ok(out)
}

fn write_value(value: &Value, out: &mut String) -> Result<()> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => write_number(n, out)?,
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_value(item, out)?;
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();

            out.push('{');
            for (idx, key) in keys.into_iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                // Key came from the map; the lookup cannot miss.
                write_value(&map[key], out)?;
            }
            out.push('}');
        }
    }
    Ok(())
}

fn write_number(n: &serde_json::Number, out: &mut String) -> Result<()> {
    if let Some(i) = n.as_i64() {
        out.push_str(&i.to_string());
        return Ok(());
    }
    if let Some(u) = n.as_u64() {
        out.push_str(&u.to_string());
        return Ok(());
    }
    let f = n
        .as_f64()
        .filter(|f| f.is_finite())
        .ok_or_else(|| Error::Json("non-finite number is not valid JSON".into()))?;
    if f == 0.0 {
        // Normalize -0 to 0
        out.push('0');
        return Ok(());
    }
    let mut buf = ryu::Buffer::new();
    out.push_str(buf.format_finite(f));
    Ok(())
}

fn write_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0C}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}
