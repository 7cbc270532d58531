//! Multi-search response decoding
//!
//! [`StreamingDecoder`] walks the response body token by token with serde
//! visitors: each sub-response is appended as soon as it is complete, hits are
//! decoded one document at a time, and keys nobody reads are skipped with
//! [`IgnoredAny`]. [`decode_whole`] parses a fully buffered body into the same
//! model.

use crate::error::EsFramesError;
use crate::Result;
use serde::de::{self, DeserializeSeed, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::io::{BufReader, Read};
use tracing::{debug, instrument};

/// A raw hit as returned by Elasticsearch (`_id`, `_source`, `fields`, ...)
pub type Document = Map<String, Value>;

const UNKNOWN_ERROR: &str = "Unknown elasticsearch error response";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MultiSearchResponse {
    #[serde(default)]
    pub responses: Vec<SearchResponse>,
}

/// One entry of the `responses` array, in request order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hits: Option<SearchResponseHits>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregations: Option<Map<String, Value>>,
}

impl SearchResponse {
    /// Human readable message of the server `error` object, if any.
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(error_message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponseHits {
    #[serde(default, deserialize_with = "lenient_total", skip_serializing_if = "Option::is_none")]
    pub total: Option<TotalHits>,
    #[serde(default)]
    pub hits: Vec<Document>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalHits {
    pub value: u64,
    #[serde(default = "default_relation")]
    pub relation: String,
}

fn default_relation() -> String {
    "eq".to_string()
}

/// Interpret `hits.total` as an object (7.x+) or a bare integer (6.x).
/// Anything else is an unknown total.
fn total_from_value(value: Value) -> Option<TotalHits> {
    match value {
        Value::Number(n) => n.as_u64().map(|value| TotalHits {
            value,
            relation: default_relation(),
        }),
        Value::Object(_) => match serde_json::from_value::<TotalHits>(value) {
            Ok(total) => Some(total),
            Err(e) => {
                debug!(error = %e, "unrecognized hits.total object");
                None
            }
        },
        Value::Null => None,
        other => {
            debug!(total = %other, "unrecognized hits.total shape");
            None
        }
    }
}

fn lenient_total<'de, D>(deserializer: D) -> std::result::Result<Option<TotalHits>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(total_from_value(Value::deserialize(deserializer)?))
}

/// Message of an Elasticsearch error object.
///
/// Prefers the first root cause, then the top-level reason, then the cause.
pub fn error_message(error: &Map<String, Value>) -> String {
    let reason = |v: Option<&Value>| {
        v.and_then(|v| v.get("reason"))
            .and_then(Value::as_str)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
    };

    error
        .get("root_cause")
        .and_then(Value::as_array)
        .and_then(|causes| reason(causes.first()))
        .or_else(|| {
            error
                .get("reason")
                .and_then(Value::as_str)
                .filter(|r| !r.is_empty())
                .map(str::to_string)
        })
        .or_else(|| reason(error.get("caused_by")))
        .unwrap_or_else(|| UNKNOWN_ERROR.to_string())
}

/// Decode a fully buffered multi-search body.
pub fn decode_whole(bytes: &[u8]) -> Result<MultiSearchResponse> {
    serde_json::from_slice(bytes).map_err(|e| EsFramesError::Decode(e.to_string()))
}

/// Result of a streaming decode
///
/// `responses` holds every sub-response decoded before `error` stopped the
/// walk; with no error it holds all of them.
#[derive(Debug, Default)]
pub struct DecodeOutcome {
    pub responses: Vec<SearchResponse>,
    pub error: Option<EsFramesError>,
}

/// Forward-only decoder over a response body
pub struct StreamingDecoder<R> {
    reader: R,
}

impl<R: Read> StreamingDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    #[instrument(level = "debug", skip_all)]
    pub fn decode(self) -> DecodeOutcome {
        let mut responses = Vec::new();
        let mut batch_error = None;

        let mut de = serde_json::Deserializer::from_reader(BufReader::new(self.reader));
        let result = BatchSeed {
            responses: &mut responses,
            error: &mut batch_error,
        }
        .deserialize(&mut de)
        .and_then(|_| de.end());

        let error = match result {
            Err(e) => {
                debug!(decoded = responses.len(), error = %e, "multi-search response decoding stopped");
                Some(EsFramesError::Decode(e.to_string()))
            }
            Ok(()) => batch_error.map(|e| EsFramesError::Downstream(error_message(&e))),
        };

        DecodeOutcome { responses, error }
    }
}

/// Top-level object: `responses` plus an optional batch-wide `error`.
struct BatchSeed<'a> {
    responses: &'a mut Vec<SearchResponse>,
    error: &'a mut Option<Map<String, Value>>,
}

impl<'de> DeserializeSeed<'de> for BatchSeed<'_> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> std::result::Result<(), D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for BatchSeed<'_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a multi-search response object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<(), A::Error> {
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "responses" => map.next_value_seed(ResponsesSeed(&mut *self.responses))?,
                "error" => *self.error = map.next_value::<Option<Map<String, Value>>>()?,
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }
        Ok(())
    }
}

/// The `responses` array; each element is pushed once complete.
struct ResponsesSeed<'a>(&'a mut Vec<SearchResponse>);

impl<'de> DeserializeSeed<'de> for ResponsesSeed<'_> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> std::result::Result<(), D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'de> Visitor<'de> for ResponsesSeed<'_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an array of search responses")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<(), A::Error> {
        while let Some(response) = seq.next_element_seed(ResponseSeed)? {
            self.0.push(response);
        }
        Ok(())
    }
}

struct ResponseSeed;

impl<'de> DeserializeSeed<'de> for ResponseSeed {
    type Value = SearchResponse;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> std::result::Result<SearchResponse, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for ResponseSeed {
    type Value = SearchResponse;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a search response object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<SearchResponse, A::Error> {
        let mut response = SearchResponse::default();
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "hits" => response.hits = map.next_value_seed(HitsSeed)?,
                "aggregations" => response.aggregations = map.next_value()?,
                "error" => response.error = map.next_value()?,
                "status" => response.status = map.next_value()?,
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }
        Ok(response)
    }
}

/// `hits`: `total` in either shape and the hit documents.
struct HitsSeed;

impl<'de> DeserializeSeed<'de> for HitsSeed {
    type Value = Option<SearchResponseHits>;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> std::result::Result<Self::Value, D::Error> {
        deserializer.deserialize_option(self)
    }
}

impl<'de> Visitor<'de> for HitsSeed {
    type Value = Option<SearchResponseHits>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a hits object")
    }

    fn visit_none<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> std::result::Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Self::Value, A::Error> {
        let mut hits = SearchResponseHits::default();
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "total" => hits.total = total_from_value(map.next_value()?),
                "hits" => map.next_value_seed(DocumentsSeed(&mut hits.hits))?,
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }
        Ok(Some(hits))
    }
}

struct DocumentsSeed<'a>(&'a mut Vec<Document>);

impl<'de> DeserializeSeed<'de> for DocumentsSeed<'_> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> std::result::Result<(), D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'de> Visitor<'de> for DocumentsSeed<'_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an array of hits")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<(), A::Error> {
        if let Some(n) = seq.size_hint() {
            self.0.reserve(n);
        }
        while let Some(document) = seq.next_element::<Document>()? {
            self.0.push(document);
        }
        Ok(())
    }
}
