//! Tagged-tuple codec
//!
//! MBQL clauses travel as JSON arrays whose first element is a string tag
//! (`["field", 1, null]`, `["and", …]`). These shapes don't map onto serde's
//! derive attributes, so each clause type converts to and from
//! `serde_json::Value` through [`Tagged`], and serde support is derived from
//! that via [`impl_serde_via_json!`].

use serde_json::{Map, Value as Json};

use crate::error::ModelError;

/// A clause with a hand-written JSON encoding.
pub trait Tagged: Sized {
    /// Clause name used in shape-violation messages.
    const CLAUSE: &'static str;

    fn to_json(&self) -> Json;

    fn from_json(value: &Json) -> Result<Self, ModelError>;
}

macro_rules! impl_serde_via_json {
    ($($ty:ty),* $(,)?) => {
        $(
            impl serde::Serialize for $ty {
                fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                    serde::Serialize::serialize(&$crate::codec::Tagged::to_json(self), serializer)
                }
            }

            impl<'de> serde::Deserialize<'de> for $ty {
                fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                    let value = <serde_json::Value as serde::Deserialize>::deserialize(deserializer)?;
                    <$ty as $crate::codec::Tagged>::from_json(&value).map_err(serde::de::Error::custom)
                }
            }
        )*
    };
}

pub(crate) use impl_serde_via_json;

/// Split `["tag", args…]` into its tag and argument slice.
pub(crate) fn split_tagged<'a>(
    clause: &'static str,
    value: &'a Json,
) -> Result<(&'a str, &'a [Json]), ModelError> {
    let items = value
        .as_array()
        .ok_or_else(|| ModelError::shape(clause, format!("expected a tagged array, got {value}")))?;
    let (head, rest) = items
        .split_first()
        .ok_or_else(|| ModelError::shape(clause, "empty clause"))?;
    let tag = head
        .as_str()
        .ok_or_else(|| ModelError::shape(clause, format!("clause tag must be a string, got {head}")))?;
    Ok((tag, rest))
}

pub(crate) fn expect_arity(
    clause: &'static str,
    tag: &str,
    args: &[Json],
    min: usize,
    max: usize,
) -> Result<(), ModelError> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            min.to_string()
        } else {
            format!("{min}..={max}")
        };
        return Err(ModelError::shape(
            clause,
            format!("\"{tag}\" takes {expected} arguments, got {}", args.len()),
        ));
    }
    Ok(())
}

pub(crate) fn tagged(tag: &str, args: impl IntoIterator<Item = Json>) -> Json {
    let mut items = vec![Json::String(tag.to_string())];
    items.extend(args);
    Json::Array(items)
}

pub(crate) fn as_object<'a>(
    clause: &'static str,
    value: &'a Json,
) -> Result<&'a Map<String, Json>, ModelError> {
    value
        .as_object()
        .ok_or_else(|| ModelError::shape(clause, format!("expected an options object, got {value}")))
}

/// Reject keys the clause does not define.
pub(crate) fn check_keys(
    clause: &'static str,
    object: &Map<String, Json>,
    allowed: &[&str],
) -> Result<(), ModelError> {
    match object.keys().find(|key| !allowed.contains(&key.as_str())) {
        Some(key) => Err(ModelError::shape(clause, format!("unexpected option \"{key}\""))),
        None => Ok(()),
    }
}

pub(crate) fn opt_string(
    clause: &'static str,
    object: &Map<String, Json>,
    key: &str,
) -> Result<Option<String>, ModelError> {
    match object.get(key) {
        None => Ok(None),
        Some(Json::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(ModelError::shape(
            clause,
            format!("\"{key}\" must be a string, got {other}"),
        )),
    }
}

pub(crate) fn required_string(
    clause: &'static str,
    object: &Map<String, Json>,
    key: &str,
) -> Result<String, ModelError> {
    opt_string(clause, object, key)?
        .ok_or_else(|| ModelError::shape(clause, format!("missing \"{key}\"")))
}

pub(crate) fn opt_bool(
    clause: &'static str,
    object: &Map<String, Json>,
    key: &str,
) -> Result<Option<bool>, ModelError> {
    match object.get(key) {
        None => Ok(None),
        Some(Json::Bool(b)) => Ok(Some(*b)),
        Some(other) => Err(ModelError::shape(
            clause,
            format!("\"{key}\" must be a boolean, got {other}"),
        )),
    }
}

pub(crate) fn as_str<'a>(clause: &'static str, value: &'a Json) -> Result<&'a str, ModelError> {
    value
        .as_str()
        .ok_or_else(|| ModelError::shape(clause, format!("expected a string, got {value}")))
}

pub(crate) fn as_i64(clause: &'static str, value: &Json) -> Result<i64, ModelError> {
    value
        .as_i64()
        .ok_or_else(|| ModelError::shape(clause, format!("expected an integer, got {value}")))
}

pub(crate) fn insert_opt(object: &mut Map<String, Json>, key: &str, value: Option<Json>) {
    if let Some(value) = value {
        object.insert(key.to_string(), value);
    }
}

/// Decode a value with serde-derived support, reporting failures as shape violations.
pub(crate) fn from_serde<T: serde::de::DeserializeOwned>(
    clause: &'static str,
    value: &Json,
) -> Result<T, ModelError> {
    serde_json::from_value(value.clone()).map_err(|e| ModelError::shape(clause, e.to_string()))
}

/// Remove `key` from `object` and decode it.
pub(crate) fn take<T: Tagged>(object: &mut Map<String, Json>, key: &str) -> Result<Option<T>, ModelError> {
    object.remove(key).map(|raw| T::from_json(&raw)).transpose()
}

/// Remove `key` from `object` and decode it as a list of clauses.
pub(crate) fn take_list<T: Tagged>(
    clause: &'static str,
    object: &mut Map<String, Json>,
    key: &str,
) -> Result<Option<Vec<T>>, ModelError> {
    match object.remove(key) {
        None => Ok(None),
        Some(Json::Array(items)) => items.iter().map(T::from_json).collect::<Result<Vec<_>, _>>().map(Some),
        Some(other) => Err(ModelError::shape(clause, format!("\"{key}\" must be a list, got {other}"))),
    }
}

pub(crate) fn list_json<T: Tagged>(items: &[T]) -> Json {
    Json::Array(items.iter().map(T::to_json).collect())
}
