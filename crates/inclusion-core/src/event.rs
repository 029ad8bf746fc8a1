//! Inbound event classification
//!
//! Every frame is a JSON object discriminated by `type`; `RoundResults` and
//! `QueryResponse` carry their payload under `response`:
//!
//! ```text
//! {"type":"SentMessage"}
//! {"type":"RoundResults","response":{"success":true,"timedOut":false,"results":{"42":{"Status":1,"Round":{..}}}}}
//! {"type":"QueryResponse","response":{"message":"<base64>"}}
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

/// One classified inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Transport confirms the request left the client
    SentMessage,
    /// Network rounds that carried the request
    RoundResults(RoundResults),
    /// Responder's answer, still base64-encoded
    QueryResponse { message: String },
}

impl InboundEvent {
    /// Short name for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::SentMessage => "SentMessage",
            InboundEvent::RoundResults(_) => "RoundResults",
            InboundEvent::QueryResponse { .. } => "QueryResponse",
        }
    }
}

/// Round report for a sent request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundResults {
    pub success: bool,
    pub timed_out: bool,
    /// `(round id, result)` pairs in wire order
    pub results: Vec<(String, RoundResult)>,
}

impl RoundResults {
    /// First round in wire order
    pub fn first(&self) -> Option<(&str, &RoundResult)> {
        self.results
            .first()
            .map(|(round_id, result)| (round_id.as_str(), result))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RoundResult {
    pub status: i64,
    pub round: RoundDescriptor,
}

/// Scheduling metadata for a network round.
///
/// Opaque beyond being shown to the user; unrecognized fields are kept in
/// `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RoundDescriptor {
    #[serde(rename = "ID", deserialize_with = "wide_uint")]
    pub id: u128,
    #[serde(rename = "UpdateID", deserialize_with = "wide_uint")]
    pub update_id: u128,
    #[serde(deserialize_with = "nullable")]
    pub state: i64,
    #[serde(deserialize_with = "nullable")]
    pub batch_size: u64,
    #[serde(deserialize_with = "nullable")]
    pub topology: Vec<String>,
    #[serde(deserialize_with = "wide_uints")]
    pub timestamps: Vec<u128>,
    pub signature: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Integer fields may arrive as JSON numbers or as decimal strings
#[derive(Deserialize)]
#[serde(untagged)]
enum WideRepr {
    Int(u64),
    Text(String),
}

impl WideRepr {
    fn into_u128<E: serde::de::Error>(self) -> std::result::Result<u128, E> {
        match self {
            WideRepr::Int(n) => Ok(n as u128),
            WideRepr::Text(s) => s
                .trim()
                .parse::<u128>()
                .map_err(|_| E::custom(format!("invalid integer {:?}", s))),
        }
    }
}

// Nil slices and zero values on the responder side may arrive as null
fn nullable<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn wide_uint<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u128, D::Error> {
    match Option::<WideRepr>::deserialize(deserializer)? {
        Some(repr) => repr.into_u128(),
        None => Ok(0),
    }
}

fn wide_uints<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Vec<u128>, D::Error> {
    let reprs = Option::<Vec<WideRepr>>::deserialize(deserializer)?.unwrap_or_default();
    reprs.into_iter().map(WideRepr::into_u128).collect()
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    response: Option<Value>,
}

#[derive(Deserialize)]
struct RawRoundResults {
    success: bool,
    #[serde(rename = "timedOut")]
    timed_out: bool,
    // A nil map on the responder side arrives as null
    results: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
struct RawQueryResponse {
    message: String,
}

/// Classify a raw inbound frame.
///
/// Never panics; anything that is not one of the three known shapes comes
/// back as `Error::Classification` carrying the frame text.
pub fn classify(raw: &[u8]) -> Result<InboundEvent> {
    let text = match std::str::from_utf8(raw) {
        Ok(text) => text,
        Err(_) => {
            return Err(Error::classification(
                "frame is not UTF-8",
                String::from_utf8_lossy(raw),
            ))
        }
    };

    let frame: RawFrame = serde_json::from_str(text)
        .map_err(|e| Error::classification(format!("invalid frame: {}", e), text))?;

    match frame.kind.as_str() {
        "SentMessage" => Ok(InboundEvent::SentMessage),
        "RoundResults" => {
            let response = require_response(frame.response, "RoundResults", text)?;
            let raw_results: RawRoundResults = serde_json::from_value(response)
                .map_err(|e| Error::classification(format!("RoundResults: {}", e), text))?;

            let mut results = Vec::new();
            for (round_id, entry) in raw_results.results.unwrap_or_default() {
                let result: RoundResult = serde_json::from_value(entry).map_err(|e| {
                    Error::classification(format!("RoundResults round {}: {}", round_id, e), text)
                })?;
                results.push((round_id, result));
            }

            Ok(InboundEvent::RoundResults(RoundResults {
                success: raw_results.success,
                timed_out: raw_results.timed_out,
                results,
            }))
        }
        "QueryResponse" => {
            let response = require_response(frame.response, "QueryResponse", text)?;
            let payload: RawQueryResponse = serde_json::from_value(response)
                .map_err(|e| Error::classification(format!("QueryResponse: {}", e), text))?;
            Ok(InboundEvent::QueryResponse {
                message: payload.message,
            })
        }
        other => Err(Error::classification(
            format!("unknown event type {:?}", other),
            text,
        )),
    }
}

fn require_response(response: Option<Value>, kind: &str, text: &str) -> Result<Value> {
    match response {
        Some(Value::Null) | None => Err(Error::classification(
            format!("{} without response", kind),
            text,
        )),
        Some(value) => Ok(value),
    }
}
