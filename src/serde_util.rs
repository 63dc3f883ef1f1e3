use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::bson::Bson;

pub(crate) fn serialize_duration_option_as_int_millis<S: Serializer>(
    val: &Option<Duration>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match val {
        Some(duration) => serializer.serialize_i64(duration.as_millis() as i64),
        None => serializer.serialize_none(),
    }
}

pub(crate) fn deserialize_duration_option_from_u64_millis<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let millis = Option::<u64>::deserialize(deserializer)?;
    Ok(millis.map(Duration::from_millis))
}

pub(crate) fn serialize_duration_option_as_int_secs<S: Serializer>(
    val: &Option<Duration>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match val {
        Some(duration) => serializer.serialize_i64(duration.as_secs() as i64),
        None => serializer.serialize_none(),
    }
}

pub(crate) fn deserialize_duration_option_from_u64_seconds<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = Option::<u64>::deserialize(deserializer)?;
    Ok(secs.map(Duration::from_secs))
}

/// Sends a JavaScript function as BSON code, which is what `mapReduce` expects.
pub(crate) fn serialize_js_code<S: Serializer>(
    val: &str,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    Bson::JavaScriptCode(val.to_string()).serialize(serializer)
}

pub(crate) fn serialize_js_code_option<S: Serializer>(
    val: &Option<String>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match val {
        Some(code) => serialize_js_code(code, serializer),
        None => serializer.serialize_none(),
    }
}
