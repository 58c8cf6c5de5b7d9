//! HTTP handlers, one module per endpoint family

pub mod cached;
pub mod custom;
pub mod cypher;
pub mod dbmeta;
pub mod explorer;
pub mod keyvalue;
pub mod roimeshes;
pub mod session;
pub mod skeletons;

use super::middleware::QueryDebug;
use super::server::AppState;
use crate::error::{ServiceError, ServiceResult};
use crate::storage::Store;
use axum::extract::Query;
use axum::http::Uri;
use axum::response::{IntoResponse, Response};
use serde::de::value::MapDeserializer;
use serde::de::{DeserializeOwned, Deserializer, IntoDeserializer, Visitor};
use serde::forward_to_deserialize_any;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub const MALFORMED_REQUEST: &str = "request object not formatted correctly";

/// Decodes a JSON body, or the query string when the body is empty
///
/// Query values are read the way the target field asks for them: string
/// fields take the raw text, other fields take the value parsed as JSON
/// (numbers, booleans, arrays).
pub fn parse_request<T: DeserializeOwned>(uri: &Uri, body: &[u8]) -> ServiceResult<T> {
    if body.iter().any(|b| !b.is_ascii_whitespace()) {
        return serde_json::from_slice(body).map_err(|_| ServiceError::bad_request(MALFORMED_REQUEST));
    }

    let Query(params) = Query::<HashMap<String, String>>::try_from_uri(uri)
        .map_err(|_| ServiceError::bad_request(MALFORMED_REQUEST))?;
    let fields = MapDeserializer::<_, serde_json::Error>::new(
        params.into_iter().map(|(key, raw)| (key, QueryValue(raw))),
    );
    T::deserialize(fields).map_err(|_| ServiceError::bad_request(MALFORMED_REQUEST))
}

/// One query-string value
struct QueryValue(String);

impl QueryValue {
    fn coerced(self) -> Value {
        serde_json::from_str(&self.0).unwrap_or_else(|_| Value::String(self.0))
    }
}

macro_rules! coerce_to_value {
    ($($method:ident)*) => {$(
        fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
            self.coerced().$method(visitor)
        }
    )*};
}

impl<'de> Deserializer<'de> for QueryValue {
    type Error = serde_json::Error;

    coerce_to_value! {
        deserialize_any deserialize_bool deserialize_i8 deserialize_i16 deserialize_i32
        deserialize_i64 deserialize_u8 deserialize_u16 deserialize_u32 deserialize_u64
        deserialize_f32 deserialize_f64 deserialize_seq deserialize_map
    }

    fn deserialize_str<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        visitor.visit_string(self.0)
    }

    fn deserialize_string<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        visitor.visit_string(self.0)
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        if self.0 == "null" {
            visitor.visit_none()
        } else {
            visitor.visit_some(self)
        }
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        name: &'static str,
        variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        self.coerced().deserialize_enum(name, variants, visitor)
    }

    forward_to_deserialize_any! {
        i128 u128 char bytes byte_buf unit unit_struct newtype_struct tuple
        tuple_struct struct identifier ignored_any
    }
}

impl<'de> IntoDeserializer<'de, serde_json::Error> for QueryValue {
    type Deserializer = Self;

    fn into_deserializer(self) -> Self {
        self
    }
}

/// Dotted prefix match: every non-empty component of `requested` equals
/// the component of `actual` at the same position
pub fn version_matches(requested: &str, actual: &str) -> bool {
    let actual: Vec<&str> = actual.split('.').collect();
    requested
        .split('.')
        .enumerate()
        .filter(|(_, part)| !part.is_empty())
        .all(|(idx, part)| actual.get(idx) == Some(&part))
}

/// Rejects a request whose `version` does not match the store's
pub fn check_store_version(requested: Option<&str>, store: &dyn Store) -> ServiceResult<()> {
    match requested {
        Some(version) if !version.is_empty() && !version_matches(version, store.version()) => {
            Err(ServiceError::incompatible_version(version, store.version()))
        }
        _ => Ok(()),
    }
}

/// `None` for the empty dataset name
pub fn scope(dataset: &str) -> Option<&str> {
    (!dataset.is_empty()).then_some(dataset)
}

/// Primary store owning `dataset`; the main store when no dataset is named
pub fn primary_store(state: &AppState, dataset: &str) -> ServiceResult<Arc<dyn Store>> {
    if dataset.is_empty() {
        Ok(state.stores.main().clone())
    } else {
        state.stores.primary_for(dataset)
    }
}

/// Attaches the executed statement for the request log
pub fn with_debug(response: impl IntoResponse, statement: &str) -> Response {
    let mut response = response.into_response();
    response
        .extensions_mut()
        .insert(QueryDebug(statement.to_string()));
    response
}
