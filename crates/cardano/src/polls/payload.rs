//! Decoding of on-chain poll metadata (CIP-0094).
//!
//! Poll payloads are maps keyed by stringified indexes. A question carries
//! `"0"` (the question text) and `"1"` (one entry per choice); a vote carries
//! `"2"` (the question hash) and `"3"` (the chosen index). Texts longer than
//! the 64-byte metadata string limit arrive as arrays of chunks.

use pallas_crypto::hash::Hasher;
use serde_json::{Map, Value};
use thiserror::Error;

/// Transaction metadata label reserved for polls
pub const POLL_LABEL: u64 = 94;

const QUESTION_KEY: &str = "0";
const CHOICES_KEY: &str = "1";
const POLL_HASH_KEY: &str = "2";
const CHOICE_KEY: &str = "3";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("payload is not a map")]
    NotAMap,

    #[error("payload has no {0:?} key")]
    MissingKey(&'static str),

    #[error("payload key {key:?} has unexpected shape {found}")]
    InvalidKey { key: &'static str, found: String },

    #[error("choice {choice} is outside the {available} available choices")]
    ChoiceOutOfRange { choice: u64, available: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollQuestion {
    pub question: String,
    pub choices: Vec<String>,
}

/// CBOR prefix of a single-entry metadata map keyed by the poll label
const POLL_MAP_PREFIX: [u8; 3] = [0xa1, 0x18, 0x5e];

/// Hash that votes use to reference a question.
///
/// It covers the whole metadata map `{ 94: question }`, while the ledger
/// stores the bytes of the question metadatum alone.
pub fn poll_hash(question_cbor: &[u8]) -> String {
    let mut hasher = Hasher::<256>::new();
    hasher.input(&POLL_MAP_PREFIX);
    hasher.input(question_cbor);
    hasher.finalize().to_string()
}

/// Normalize a hash as found in metadata or user input to bare lowercase hex
pub fn normalize_hash(raw: &str) -> String {
    let raw = raw.trim();
    let raw = raw.strip_prefix("0x").unwrap_or(raw);
    raw.to_ascii_lowercase()
}

fn as_map(payload: &Value) -> Result<&Map<String, Value>, PayloadError> {
    let map = payload.as_object().ok_or(PayloadError::NotAMap)?;

    // tolerate payloads still wrapped in their metadata label
    match map.get(&POLL_LABEL.to_string()) {
        Some(inner) => inner.as_object().ok_or(PayloadError::NotAMap),
        None => Ok(map),
    }
}

fn field<'a>(map: &'a Map<String, Value>, key: &'static str) -> Result<&'a Value, PayloadError> {
    map.get(key).ok_or(PayloadError::MissingKey(key))
}

fn invalid(key: &'static str, value: &Value) -> PayloadError {
    let mut found = value.to_string();
    found.truncate(64);

    PayloadError::InvalidKey { key, found }
}

/// A text made of either a single string or an array of string chunks
fn text(key: &'static str, value: &Value) -> Result<String, PayloadError> {
    match value {
        Value::String(x) => Ok(x.clone()),
        Value::Array(chunks) => chunks
            .iter()
            .map(|chunk| chunk.as_str().ok_or_else(|| invalid(key, value)))
            .collect(),
        _ => Err(invalid(key, value)),
    }
}

pub fn decode_poll(payload: &Value) -> Result<PollQuestion, PayloadError> {
    let map = as_map(payload)?;

    let question = text(QUESTION_KEY, field(map, QUESTION_KEY)?)?;

    let raw_choices = field(map, CHOICES_KEY)?;

    let choices = raw_choices
        .as_array()
        .ok_or_else(|| invalid(CHOICES_KEY, raw_choices))?
        .iter()
        .map(|choice| text(CHOICES_KEY, choice))
        .collect::<Result<Vec<_>, _>>()?;

    if choices.is_empty() {
        return Err(invalid(CHOICES_KEY, raw_choices));
    }

    Ok(PollQuestion { question, choices })
}

/// Hash of the question a vote answers
pub fn decode_vote_poll_hash(payload: &Value) -> Result<String, PayloadError> {
    let map = as_map(payload)?;
    let raw = field(map, POLL_HASH_KEY)?;

    raw.as_str()
        .map(normalize_hash)
        .ok_or_else(|| invalid(POLL_HASH_KEY, raw))
}

/// Index of the chosen answer, validated against the number of choices
pub fn decode_vote_choice(payload: &Value, available: usize) -> Result<usize, PayloadError> {
    let map = as_map(payload)?;
    let raw = field(map, CHOICE_KEY)?;

    let choice = raw.as_u64().ok_or_else(|| invalid(CHOICE_KEY, raw))?;

    match usize::try_from(choice) {
        Ok(index) if index < available => Ok(index),
        _ => Err(PayloadError::ChoiceOutOfRange { choice, available }),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decodes_chunked_poll() {
        let payload = json!({
            "0": ["Should Cardano SPOs ", "adopt CIP-0094?"],
            "1": [["Yes"], ["No"], ["Abstain"]]
        });

        let question = decode_poll(&payload).unwrap();

        assert_eq!(question.question, "Should Cardano SPOs adopt CIP-0094?");
        assert_eq!(question.choices, vec!["Yes", "No", "Abstain"]);
    }

    #[test]
    fn decodes_poll_wrapped_in_label() {
        let payload = json!({ "94": { "0": "Pick one", "1": ["a", "b"] } });

        let question = decode_poll(&payload).unwrap();

        assert_eq!(question.question, "Pick one");
        assert_eq!(question.choices, vec!["a", "b"]);
    }

    #[test]
    fn poll_without_choices_is_rejected() {
        assert_eq!(
            decode_poll(&json!({ "0": "q" })),
            Err(PayloadError::MissingKey("1"))
        );

        assert!(matches!(
            decode_poll(&json!({ "0": "q", "1": [] })),
            Err(PayloadError::InvalidKey { key: "1", .. })
        ));

        assert!(matches!(
            decode_poll(&json!({ "0": "q", "1": [["a"], [7]] })),
            Err(PayloadError::InvalidKey { key: "1", .. })
        ));
    }

    #[test]
    fn poll_hash_covers_label() {
        let question = [0xa0];

        let expected = Hasher::<256>::hash(&[0xa1, 0x18, 0x5e, 0xa0]).to_string();

        assert_eq!(poll_hash(&question), expected);
        assert_ne!(poll_hash(&question), Hasher::<256>::hash(&question).to_string());
        assert_eq!(poll_hash(&question).len(), 64);
    }

    #[test]
    fn decodes_vote() {
        let payload = json!({ "2": "0xABCDEF", "3": 1 });

        assert_eq!(decode_vote_poll_hash(&payload).unwrap(), "abcdef");
        assert_eq!(decode_vote_choice(&payload, 3).unwrap(), 1);
    }

    #[test]
    fn malformed_choice_is_an_error() {
        assert_eq!(decode_vote_choice(&json!("nope"), 3), Err(PayloadError::NotAMap));
        assert_eq!(
            decode_vote_choice(&json!({ "2": "aa" }), 3),
            Err(PayloadError::MissingKey("3"))
        );
        assert!(matches!(
            decode_vote_choice(&json!({ "3": "one" }), 3),
            Err(PayloadError::InvalidKey { key: "3", .. })
        ));
        assert!(matches!(
            decode_vote_choice(&json!({ "3": -1 }), 3),
            Err(PayloadError::InvalidKey { key: "3", .. })
        ));
        assert_eq!(
            decode_vote_choice(&json!({ "3": 3 }), 3),
            Err(PayloadError::ChoiceOutOfRange {
                choice: 3,
                available: 3
            })
        );
    }
}
