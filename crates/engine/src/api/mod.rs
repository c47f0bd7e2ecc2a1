//! HTTP clients for the prop, schedule and injury sources
//!
//! Each client exposes a pure `parse_*` function over the response body so
//! the response handling can be exercised without the network.

pub mod espn;
pub mod prizepicks;
pub mod sleeper;
pub mod underdog;

pub use espn::EspnClient;
pub use prizepicks::PrizePicksClient;
pub use sleeper::SleeperClient;
pub use underdog::UnderdogClient;

use serde_json::Value;

const USER_AGENT: &str = "Mozilla/5.0";

/// Ids show up both as strings and as numbers
pub(crate) fn id_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Numbers show up both as JSON numbers and as numeric strings
pub(crate) fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn str_field<'a>(v: &'a Value, field: &str) -> Option<&'a str> {
    v.get(field).and_then(Value::as_str).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_loose_scalars() {
        assert_eq!(id_string(&json!(42)), Some("42".into()));
        assert_eq!(id_string(&json!("a1")), Some("a1".into()));
        assert_eq!(id_string(&json!(null)), None);
        assert_eq!(as_f64(&json!("24.5")), Some(24.5));
        assert_eq!(as_f64(&json!(7)), Some(7.0));
        assert_eq!(as_f64(&json!("n/a")), None);
    }
}
