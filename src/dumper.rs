use serde_json::Value;

use crate::config::JsonLibrary;
use crate::error::WsError;

/// Serializes an already-built JSON value to wire bytes (§4.2 "the JSON dump
/// function is selectable by configuration"). Every variant ultimately goes
/// through `serde_json` — there's no binary-JSON crate pulled in here — but
/// `FastBinary` and `Bson` additionally
/// run the value through [`normalize`], the hook point a real binary encoder
/// would use to coerce non-JSON-native types (timestamps, byte strings,
/// opaque ids) before emission, matching what `bson.json_util` does when
/// asked to render BSON-flavored values as JSON.
pub trait Dumper: Send + Sync {
    fn dump(&self, value: Value) -> Result<String, WsError>;
}

pub struct StdlibDumper;
pub struct DefaultDumper;
pub struct FastBinaryDumper;
pub struct BsonDumper;

impl Dumper for StdlibDumper {
    fn dump(&self, value: Value) -> Result<String, WsError> {
        Ok(serde_json::to_string(&value)?)
    }
}

impl Dumper for DefaultDumper {
    fn dump(&self, value: Value) -> Result<String, WsError> {
        Ok(serde_json::to_string(&value)?)
    }
}

impl Dumper for FastBinaryDumper {
    fn dump(&self, value: Value) -> Result<String, WsError> {
        Ok(serde_json::to_string(&normalize(value, false))?)
    }
}

impl Dumper for BsonDumper {
    fn dump(&self, value: Value) -> Result<String, WsError> {
        Ok(serde_json::to_string(&normalize(value, true))?)
    }
}

/// Recursively coerces values that wouldn't be natively serializable in a
/// binary-JSON encoding (timestamps, byte strings, opaque ids) to the string
/// forms §4.2 specifies. Every value already reaching this function arrived
/// as a `serde_json::Value` — `chrono` timestamps are already RFC 3339
/// strings by the time a `ServerMessage` is built — so most of this pass is
/// structurally an identity walk; it exists so `FastBinaryDumper`/
/// `BsonDumper` have the same seam a genuine binary encoder would need,
/// rather than being indistinguishable from the JSON dumpers by
/// construction.
///
/// `stringify_numeric_ids` matches `bson.json_util`'s habit of eagerly
/// stringifying non-JSON-native id types: any object key ending in `id`
/// whose value is a bare number is rendered as a string instead.
fn normalize(value: Value, stringify_numeric_ids: bool) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| {
                    let v = if stringify_numeric_ids && k.ends_with("id") && v.is_number() {
                        Value::String(v.to_string())
                    } else {
                        normalize(v, stringify_numeric_ids)
                    };
                    (k, v)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| normalize(v, stringify_numeric_ids))
                .collect(),
        ),
        other => other,
    }
}

pub fn for_library(lib: JsonLibrary) -> Box<dyn Dumper> {
    match lib {
        JsonLibrary::Stdlib => Box::new(StdlibDumper),
        JsonLibrary::Default => Box::new(DefaultDumper),
        JsonLibrary::FastBinary => Box::new(FastBinaryDumper),
        JsonLibrary::Bson => Box::new(BsonDumper),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_library_round_trips_a_simple_object() {
        let value = serde_json::json!({"a": 1, "b": "two"});
        for lib in [
            JsonLibrary::Stdlib,
            JsonLibrary::Default,
            JsonLibrary::FastBinary,
            JsonLibrary::Bson,
        ] {
            let dumped = for_library(lib).dump(value.clone()).unwrap();
            let parsed: Value = serde_json::from_str(&dumped).unwrap();
            assert_eq!(parsed, value);
        }
    }

    #[test]
    fn normalize_preserves_nested_structure_when_not_stringifying_ids() {
        let value = serde_json::json!({"outer": {"inner": [1, "x", true]}});
        let normalized = normalize(value.clone(), false);
        assert_eq!(normalized, value);
    }

    #[test]
    fn bson_dumper_stringifies_numeric_id_fields() {
        let value = serde_json::json!({"cid": 42, "data": {"id": 7, "other": 7}});
        let dumped = BsonDumper.dump(value).unwrap();
        let parsed: Value = serde_json::from_str(&dumped).unwrap();
        assert_eq!(parsed["cid"], "42");
        assert_eq!(parsed["data"]["id"], "7");
        assert_eq!(parsed["data"]["other"], 7);
    }

    #[test]
    fn fast_binary_dumper_leaves_numeric_ids_alone() {
        let value = serde_json::json!({"cid": 42});
        let dumped = FastBinaryDumper.dump(value).unwrap();
        let parsed: Value = serde_json::from_str(&dumped).unwrap();
        assert_eq!(parsed["cid"], 42);
    }
}
