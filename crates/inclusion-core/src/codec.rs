//! Payload codec: user text -> commitment -> wire bytes, and response decoding
//!
//! Outbound payload layout (UTF-8):
//!
//! ```text
//! <command tag>{"identityCommitment":"0x<64 hex digits>"}
//! ```

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::constants::WRAPPER_FIELD;
use crate::{Error, IdentityCommitment, Result};

/// Canonical request wrapper object
#[derive(Deserialize)]
struct CommitmentWrapper {
    #[serde(rename = "identityCommitment")]
    identity_commitment: IdentityCommitment,
}

/// Validate raw user text as an identity commitment.
///
/// Accepts the full wrapper object (`{"identityCommitment": "0x.."}`), a JSON
/// string literal, or bare text. Whatever form is given is normalized into the
/// wrapper object before the schema check, so every failure is the same
/// `Error::Validation`.
pub fn validate(text: &str) -> Result<IdentityCommitment> {
    let trimmed = text.trim();

    let wrapper = match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => Value::Object(map),
        Ok(Value::String(inner)) => wrap(inner),
        Ok(_) => return Err(Error::Validation),
        Err(_) => wrap(trimmed.to_string()),
    };

    let parsed: CommitmentWrapper =
        serde_json::from_value(wrapper).map_err(|_| Error::Validation)?;
    Ok(parsed.identity_commitment)
}

fn wrap(commitment: String) -> Value {
    let mut map = Map::new();
    map.insert(WRAPPER_FIELD.to_string(), Value::String(commitment));
    Value::Object(map)
}

/// Render the exact payload bytes handed to the transport
pub fn encode(commitment: &IdentityCommitment, command_tag: &str) -> Vec<u8> {
    let body = wrap(commitment.as_str().to_string()).to_string();

    let mut payload = Vec::with_capacity(command_tag.len() + body.len());
    payload.extend_from_slice(command_tag.as_bytes());
    payload.extend_from_slice(body.as_bytes());
    payload
}

/// Recover the commitment from an encoded payload
pub fn decode_request(payload: &[u8], command_tag: &str) -> Result<IdentityCommitment> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| Error::Decode(format!("payload is not UTF-8: {}", e)))?;
    let body = text
        .strip_prefix(command_tag)
        .ok_or_else(|| Error::Decode(format!("payload does not start with {:?}", command_tag)))?;

    let parsed: CommitmentWrapper = serde_json::from_str(body).map_err(|_| Error::Validation)?;
    Ok(parsed.identity_commitment)
}

/// Decode a `QueryResponse` message: base64, then UTF-8, then JSON.
pub fn decode_response(message: &str) -> Result<Value> {
    let bytes = BASE64
        .decode(message.trim())
        .map_err(|e| Error::Decode(format!("invalid base64: {}", e)))?;
    let text =
        String::from_utf8(bytes).map_err(|e| Error::Decode(format!("invalid UTF-8: {}", e)))?;
    serde_json::from_str(&text).map_err(|e| Error::Decode(format!("invalid JSON: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::COMMAND_TAG;
    use rand::Rng;

    const VALID: &str = "0x301797a6e7cd8f4a2b1e4cb1a8f3d6f0c0b7e5d4a3c2b1f0e9d8c7b6a5f5c3de";

    #[test]
    fn test_validate_accepted_forms() {
        let bare = validate(VALID).unwrap();
        let quoted = validate(&format!("\"{}\"", VALID)).unwrap();
        let wrapped = validate(&format!("{{\"identityCommitment\": \"{}\"}}", VALID)).unwrap();
        let padded = validate(&format!("  {}\n", VALID)).unwrap();

        assert_eq!(bare, quoted);
        assert_eq!(bare, wrapped);
        assert_eq!(bare, padded);
        assert_eq!(bare.as_str(), VALID);
    }

    #[test]
    fn test_validate_ignores_extra_wrapper_fields() {
        let text = format!("{{\"identityCommitment\": \"{}\", \"note\": 1}}", VALID);
        assert!(validate(&text).is_ok());
    }

    #[test]
    fn test_validate_rejects() {
        for text in [
            "not-hex",
            "",
            "0x",
            "42",
            "null",
            "[]",
            "{}",
            "{\"identityCommitment\": 7}",
            "{\"commitment\": \"0x00\"}",
            "{\"identityCommitment\": \"0x301797\"",
        ] {
            let err = validate(text).unwrap_err();
            assert!(matches!(err, Error::Validation), "{:?} -> {:?}", text, err);
            assert_eq!(err.to_string(), "wrong format");
        }
    }

    #[test]
    fn test_validate_random_garbage() {
        let mut rng = rand::thread_rng();
        let alphabet: Vec<char> = "0123456789abcdefxX{}\" :gz".chars().collect();

        for _ in 0..500 {
            let len = rng.gen_range(0..80);
            let text: String = (0..len)
                .map(|_| alphabet[rng.gen_range(0..alphabet.len())])
                .collect();

            let well_formed = text.len() == 66
                && text.starts_with("0x")
                && text[2..].chars().all(|c| c.is_ascii_hexdigit());
            if !well_formed {
                assert!(validate(&text).is_err(), "accepted {:?}", text);
            }
        }
    }

    #[test]
    fn test_encode_exact_bytes() {
        let commitment = validate(VALID).unwrap();
        let payload = encode(&commitment, COMMAND_TAG);
        let expected = format!("inclusionProof,{{\"identityCommitment\":\"{}\"}}", VALID);
        assert_eq!(payload, expected.as_bytes());
    }

    #[test]
    fn test_encode_decode_request_random() {
        let mut rng = rand::thread_rng();

        for _ in 0..100 {
            let bytes: [u8; 32] = rng.gen();
            let digits: String = hex::encode(bytes)
                .chars()
                .map(|c| if rng.gen_bool(0.5) { c.to_ascii_uppercase() } else { c })
                .collect();
            let text = format!("0x{}", digits);

            let commitment = validate(&text).unwrap();
            let payload = encode(&commitment, COMMAND_TAG);
            let decoded = decode_request(&payload, COMMAND_TAG).unwrap();

            assert_eq!(decoded, commitment);
            assert_eq!(decoded.as_str(), text);
            assert_eq!(decoded.as_bytes(), &bytes);
        }
    }

    #[test]
    fn test_decode_request_wrong_tag() {
        let commitment = validate(VALID).unwrap();
        let payload = encode(&commitment, "otherCommand,");
        assert!(matches!(
            decode_request(&payload, COMMAND_TAG),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn test_decode_response() {
        let message = BASE64.encode(br#"{"included":true,"index":3}"#);
        let value = decode_response(&message).unwrap();
        assert_eq!(value["included"], Value::Bool(true));
        assert_eq!(value["index"], 3);
    }

    #[test]
    fn test_decode_response_layers() {
        // Not base64
        assert!(matches!(decode_response("%%%"), Err(Error::Decode(_))));
        // base64 of invalid UTF-8
        let bad_utf8 = BASE64.encode([0xffu8, 0xfe, 0xfd]);
        assert!(matches!(decode_response(&bad_utf8), Err(Error::Decode(_))));
        // base64 of text that is not JSON
        let not_json = BASE64.encode("inclusion proof pending");
        assert!(matches!(decode_response(&not_json), Err(Error::Decode(_))));
    }
}
