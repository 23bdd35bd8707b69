pub mod connection;
pub mod job;
pub mod requests;
pub mod responses;

use serde::{Deserialize, Deserializer};

/// Backend ids are integer primary keys on some deployments and strings on others.
pub(crate) fn de_string_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Str(String),
        Int(i64),
        UInt(u64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Str(s) => s,
        RawId::Int(n) => n.to_string(),
        RawId::UInt(n) => n.to_string(),
    })
}

pub(crate) fn de_opt_string_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapper(#[serde(deserialize_with = "de_string_id")] String);

    Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|w| w.0))
}

/// Frappe docfield flags arrive as `0/1`, booleans, or null.
pub(crate) fn de_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawFlag {
        Bool(bool),
        Int(i64),
        Str(String),
    }

    Ok(match Option::<RawFlag>::deserialize(deserializer)? {
        None => false,
        Some(RawFlag::Bool(b)) => b,
        Some(RawFlag::Int(n)) => n != 0,
        Some(RawFlag::Str(s)) => matches!(s.trim(), "1" | "true" | "True"),
    })
}

/// Row counters may be null while a job is still pending.
pub(crate) fn de_count<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u64>::deserialize(deserializer)?.unwrap_or(0))
}
