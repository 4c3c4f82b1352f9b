//! Serde helpers for loosely typed panel JSON

use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer};

/// Deserialize `null` as the type's default.
///
/// Panels written in languages with nil collections emit `null` for an empty
/// map or list; snapshots must read those as empty.
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Loose {
    Int(i64),
    UInt(u64),
    Str(String),
    Other(IgnoredAny),
}

/// Read an integer counter, yielding 0 for anything that is not an integer.
///
/// Callers that need a float or string counter look at the raw JSON after
/// the typed decode comes back empty.
pub fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Loose::deserialize(deserializer)? {
        Loose::Int(value) => value,
        Loose::UInt(value) => i64::try_from(value).unwrap_or(i64::MAX),
        Loose::Str(_) | Loose::Other(_) => 0,
    })
}

/// Read a string that some panel versions emit as a number.
pub fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Loose::deserialize(deserializer)? {
        Loose::Str(value) => value,
        Loose::Int(value) => value.to_string(),
        Loose::UInt(value) => value.to_string(),
        Loose::Other(_) => String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Probe {
        #[serde(default, deserialize_with = "null_as_default")]
        ids: Vec<i64>,
    }

    #[derive(Deserialize)]
    struct Counters {
        #[serde(default, deserialize_with = "lenient_i64")]
        used: i64,
        #[serde(default, deserialize_with = "lenient_string")]
        tag: String,
    }

    #[test]
    fn null_and_missing_read_as_empty() {
        let nulled: Probe = serde_json::from_str(r#"{"ids": null}"#).unwrap();
        assert!(nulled.ids.is_empty());

        let missing: Probe = serde_json::from_str("{}").unwrap();
        assert!(missing.ids.is_empty());

        let present: Probe = serde_json::from_str(r#"{"ids": [3, 1]}"#).unwrap();
        assert_eq!(present.ids, vec![3, 1]);
    }

    #[test]
    fn lenient_counters_never_fail_the_record() {
        let int: Counters = serde_json::from_str(r#"{"used": 42, "tag": 7}"#).unwrap();
        assert_eq!(int.used, 42);
        assert_eq!(int.tag, "7");

        let float: Counters = serde_json::from_str(r#"{"used": 1.5e3, "tag": null}"#).unwrap();
        assert_eq!(float.used, 0);
        assert_eq!(float.tag, "");

        let text: Counters = serde_json::from_str(r#"{"used": "12", "tag": "x"}"#).unwrap();
        assert_eq!(text.used, 0);
        assert_eq!(text.tag, "x");
    }
}
