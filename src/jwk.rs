//! JSON Web Key Set and ClearKey license request formats.
//!
//! Key sets look like
//! `{"keys":[{"kty":"oct","kid":"<b64>","k":"<b64>"}]}` where every base64
//! value uses the URL-safe alphabet without `=` padding. Padding is rejected
//! on input and never emitted on output. Unknown fields are ignored.
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::{json, Map, Value};

use crate::error::{Error, Result};
use crate::session::SessionType;

/// A `(key id, key)` pair as carried in a key set.
pub type KeyIdAndKeyPair = (Vec<u8>, Vec<u8>);

const KEYS_TAG: &str = "keys";
const KEY_TYPE_TAG: &str = "kty";
const KEY_TYPE_OCT: &str = "oct";
const KEY_ID_TAG: &str = "kid";
const KEY_TAG: &str = "k";
const TYPE_TAG: &str = "type";
const KEY_IDS_TAG: &str = "kids";

/// A parsed key set plus the session type it was issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKeySet {
    pub keys: Vec<KeyIdAndKeyPair>,
    pub session_type: SessionType,
}

/// Encode bytes as unpadded URL-safe base64.
#[must_use]
pub fn encode_base64(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// Decode unpadded URL-safe base64; any `=` is an error.
pub fn decode_base64(encoded: &str) -> Result<Vec<u8>> {
    if encoded.contains('=') {
        return Err(Error::InvalidKeySet(
            "base64 values must not be padded".to_string(),
        ));
    }
    Ok(URL_SAFE_NO_PAD.decode(encoded)?)
}

/// Serialize `(key id, key)` pairs as a JSON Web Key Set.
#[must_use]
pub fn serialize(pairs: &[KeyIdAndKeyPair]) -> String {
    key_set_value(pairs, None).to_string()
}

/// Serialize a key set that also names the session type it applies to.
#[must_use]
pub fn serialize_with_type(pairs: &[KeyIdAndKeyPair], session_type: SessionType) -> String {
    key_set_value(pairs, Some(session_type)).to_string()
}

fn key_set_value(pairs: &[KeyIdAndKeyPair], session_type: Option<SessionType>) -> Value {
    let keys: Vec<Value> = pairs
        .iter()
        .map(|(kid, key)| {
            json!({
                KEY_TYPE_TAG: KEY_TYPE_OCT,
                KEY_ID_TAG: encode_base64(kid),
                KEY_TAG: encode_base64(key),
            })
        })
        .collect();

    let mut set = Map::new();
    set.insert(KEYS_TAG.to_string(), Value::Array(keys));
    if let Some(session_type) = session_type {
        set.insert(TYPE_TAG.to_string(), json!(session_type.as_str()));
    }
    Value::Object(set)
}

/// Parse a JSON Web Key Set into `(key id, key)` pairs.
///
/// Either every entry is valid and returned, or an error is returned.
/// Key lengths are not checked here.
pub fn parse(json: &[u8]) -> Result<Vec<KeyIdAndKeyPair>> {
    Ok(parse_key_set(json)?.keys)
}

/// Parse a JSON Web Key Set including its optional `"type"` member.
pub fn parse_key_set(json: &[u8]) -> Result<ParsedKeySet> {
    let root = parse_ascii_object(json).map_err(Error::InvalidKeySet)?;

    let entries = root
        .get(KEYS_TAG)
        .and_then(Value::as_array)
        .ok_or_else(|| Error::InvalidKeySet("missing \"keys\" array".to_string()))?;

    let keys = entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            parse_key_entry(entry)
                .map_err(|e| Error::InvalidKeySet(format!("key {}: {}", index, e)))
        })
        .collect::<Result<Vec<_>>>()?;

    let session_type = match root.get(TYPE_TAG) {
        None => SessionType::Temporary,
        Some(Value::String(name)) => name
            .parse()
            .map_err(|_| Error::InvalidKeySet(format!("unsupported type \"{}\"", name)))?,
        Some(_) => {
            return Err(Error::InvalidKeySet(
                "\"type\" must be a string".to_string(),
            ))
        }
    };

    Ok(ParsedKeySet { keys, session_type })
}

fn parse_key_entry(entry: &Value) -> std::result::Result<KeyIdAndKeyPair, String> {
    let entry = entry
        .as_object()
        .ok_or_else(|| "entry is not an object".to_string())?;

    match entry.get(KEY_TYPE_TAG).and_then(Value::as_str) {
        Some(KEY_TYPE_OCT) => {}
        Some(other) => return Err(format!("unsupported kty \"{}\"", other)),
        None => return Err("missing kty".to_string()),
    }

    let kid = decode_member(entry, KEY_ID_TAG)?;
    let key = decode_member(entry, KEY_TAG)?;
    Ok((kid, key))
}

fn decode_member(entry: &Map<String, Value>, tag: &str) -> std::result::Result<Vec<u8>, String> {
    let encoded = entry
        .get(tag)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("missing \"{}\"", tag))?;
    if encoded.is_empty() {
        return Err(format!("empty \"{}\"", tag));
    }
    let decoded = decode_base64(encoded).map_err(|e| format!("\"{}\": {}", tag, e))?;
    if decoded.is_empty() {
        return Err(format!("empty \"{}\"", tag));
    }
    Ok(decoded)
}

/// Build a ClearKey license request: `{"kids":[...],"type":"..."}`.
#[must_use]
pub fn create_license_request(key_ids: &[Vec<u8>], session_type: SessionType) -> Vec<u8> {
    json!({
        KEY_IDS_TAG: encode_key_ids(key_ids),
        TYPE_TAG: session_type.as_str(),
    })
    .to_string()
    .into_bytes()
}

/// Build `keyids` init data: `{"kids":[...]}`.
#[must_use]
pub fn create_key_ids_init_data(key_ids: &[Vec<u8>]) -> Vec<u8> {
    json!({ KEY_IDS_TAG: encode_key_ids(key_ids) })
        .to_string()
        .into_bytes()
}

fn encode_key_ids(key_ids: &[Vec<u8>]) -> Vec<Value> {
    key_ids
        .iter()
        .map(|kid| Value::String(encode_base64(kid)))
        .collect()
}

/// Return the first key id named by a ClearKey license request.
pub fn extract_first_key_id_from_license_request(request: &[u8]) -> Result<Vec<u8>> {
    let root = parse_ascii_object(request).map_err(Error::InvalidLicenseRequest)?;
    let first = root
        .get(KEY_IDS_TAG)
        .and_then(Value::as_array)
        .and_then(|kids| kids.first())
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidLicenseRequest("missing \"kids\" entry".to_string()))?;
    decode_base64(first).map_err(|e| Error::InvalidLicenseRequest(e.to_string()))
}

/// Parse `keyids` init data into its key ids.
///
/// Requires at least one id, each 1..=`max_key_id_length` bytes.
pub fn extract_key_ids_from_key_ids_init_data(
    init_data: &[u8],
    max_key_id_length: usize,
) -> Result<Vec<Vec<u8>>> {
    let root = parse_ascii_object(init_data).map_err(Error::InvalidInitData)?;
    let kids = root
        .get(KEY_IDS_TAG)
        .and_then(Value::as_array)
        .ok_or_else(|| Error::InvalidInitData("missing \"kids\" array".to_string()))?;
    if kids.is_empty() {
        return Err(Error::InvalidInitData("\"kids\" is empty".to_string()));
    }

    kids.iter()
        .map(|kid| {
            let encoded = kid
                .as_str()
                .ok_or_else(|| Error::InvalidInitData("key id is not a string".to_string()))?;
            let decoded =
                decode_base64(encoded).map_err(|e| Error::InvalidInitData(e.to_string()))?;
            if decoded.is_empty() || decoded.len() > max_key_id_length {
                return Err(Error::InvalidInitData(format!(
                    "key id length {} out of range",
                    decoded.len()
                )));
            }
            Ok(decoded)
        })
        .collect()
}

fn parse_ascii_object(input: &[u8]) -> std::result::Result<Map<String, Value>, String> {
    if !input.is_ascii() {
        return Err("input is not ASCII".to_string());
    }
    match serde_json::from_slice::<Value>(input) {
        Ok(Value::Object(root)) => Ok(root),
        Ok(_) => Err("top level is not an object".to_string()),
        Err(e) => Err(format!("not valid JSON: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 16] = [
        0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f, 0x10, 0x11, 0x12,
        0x13,
    ];

    #[test]
    fn serialize_matches_wire_format() {
        let json = serialize(&[(vec![0x01, 0x02, 0x03, 0x04], KEY.to_vec())]);
        assert_eq!(
            json,
            r#"{"keys":[{"kty":"oct","kid":"AQIDBA","k":"BAUGBwgJCgsMDQ4PEBESEw"}]}"#
        );
        assert!(!json.contains('='));
    }

    #[test]
    fn serialize_empty_set() {
        assert_eq!(serialize(&[]), r#"{"keys":[]}"#);
    }

    #[test]
    fn round_trip_various_key_id_lengths() {
        for len in [0usize, 1, 2, 3, 4, 5, 16, 17] {
            let kid: Vec<u8> = (0..len as u8).map(|b| b.wrapping_mul(37)).collect();
            let json = serialize(&[(kid.clone(), KEY.to_vec())]);
            assert!(!json.contains('='));
            if kid.is_empty() {
                // An empty kid serializes but is not accepted back.
                assert!(parse(json.as_bytes()).is_err());
            } else {
                let parsed = parse(json.as_bytes()).expect("parse");
                assert_eq!(parsed, vec![(kid, KEY.to_vec())]);
            }
        }
    }

    #[test]
    fn multiple_keys_keep_order() {
        let pairs = vec![
            (b"first".to_vec(), KEY.to_vec()),
            (b"second".to_vec(), vec![0xffu8; 16]),
        ];
        let parsed = parse(serialize(&pairs).as_bytes()).expect("parse");
        assert_eq!(parsed, pairs);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let json = br#"{"keys":[{"kty":"oct","kid":"AQI","k":"BAUGBwgJCgsMDQ4PEBESEw","alg":"A128KW","use":"enc"}],"extra":1}"#;
        let parsed = parse(json).expect("parse");
        assert_eq!(parsed, vec![(vec![0x01, 0x02], KEY.to_vec())]);
    }

    #[test]
    fn url_safe_alphabet_is_used() {
        let kid = vec![0xfb, 0xff];
        let json = serialize(&[(kid.clone(), KEY.to_vec())]);
        assert!(json.contains(r#""kid":"-_8""#));
        assert_eq!(parse(json.as_bytes()).expect("parse")[0].0, kid);
    }

    #[test]
    fn invalid_key_sets_are_rejected() {
        let cases: &[&[u8]] = &[
            b"",
            b"[]",
            b"{}",
            br#"{"keys":{}}"#,
            br#"{"keys":[1,2,3]}"#,
            br#"{"keys":[{"kty":"RSA","kid":"AQI","k":"BAUGBwgJCgsMDQ4PEBESEw"}]}"#,
            br#"{"keys":[{"kid":"AQI","k":"BAUGBwgJCgsMDQ4PEBESEw"}]}"#,
            br#"{"keys":[{"kty":"oct","k":"BAUGBwgJCgsMDQ4PEBESEw"}]}"#,
            br#"{"keys":[{"kty":"oct","kid":"AQI"}]}"#,
            br#"{"keys":[{"kty":"oct","kid":"","k":"BAUGBwgJCgsMDQ4PEBESEw"}]}"#,
            br#"{"keys":[{"kty":"oct","kid":"AQI=","k":"BAUGBwgJCgsMDQ4PEBESEw"}]}"#,
            br#"{"keys":[{"kty":"oct","kid":"AQI","k":"BAUGBwgJCgsMDQ4PEBESEw=="}]}"#,
            br#"{"keys":[{"kty":"oct","kid":"A!I","k":"BAUGBwgJCgsMDQ4PEBESEw"}]}"#,
            br#"{"keys":[{"kty":"oct","kid":"AQI","k":"BAUGBwgJCgsMDQ4PEBESEw"},{"kty":"oct"}]}"#,
        ];
        for case in cases {
            assert!(
                parse(case).is_err(),
                "expected rejection of {:?}",
                String::from_utf8_lossy(case)
            );
        }
    }

    #[test]
    fn non_ascii_input_is_rejected() {
        let json = "{\"keys\":[],\"note\":\"caf\u{e9}\"}";
        let err = parse(json.as_bytes()).expect_err("non-ascii");
        assert!(err.to_string().contains("ASCII"));
    }

    #[test]
    fn key_set_type_is_parsed() {
        let json = serialize_with_type(&[(b"kid".to_vec(), KEY.to_vec())], SessionType::PersistentLicense);
        let parsed = parse_key_set(json.as_bytes()).expect("parse");
        assert_eq!(parsed.session_type, SessionType::PersistentLicense);

        let parsed = parse_key_set(serialize(&[]).as_bytes()).expect("parse");
        assert_eq!(parsed.session_type, SessionType::Temporary);
        assert!(parsed.keys.is_empty());

        assert!(parse_key_set(br#"{"keys":[],"type":"forever"}"#).is_err());
        assert!(parse_key_set(br#"{"keys":[],"type":1}"#).is_err());
    }

    #[test]
    fn license_request_round_trip() {
        let kids = vec![vec![0x01, 0x02, 0x03], vec![0x04]];
        let request = create_license_request(&kids, SessionType::Temporary);
        assert_eq!(
            String::from_utf8(request.clone()).expect("utf8"),
            r#"{"kids":["AQID","BA"],"type":"temporary"}"#
        );
        assert_eq!(
            extract_first_key_id_from_license_request(&request).expect("first kid"),
            kids[0]
        );
        assert!(extract_first_key_id_from_license_request(br#"{"kids":[]}"#).is_err());
    }

    #[test]
    fn key_ids_init_data_round_trip() {
        let kids = vec![vec![0xaa; 16], vec![0xbb; 3]];
        let init_data = create_key_ids_init_data(&kids);
        assert_eq!(
            extract_key_ids_from_key_ids_init_data(&init_data, 512).expect("kids"),
            kids
        );
        assert!(extract_key_ids_from_key_ids_init_data(&init_data, 8).is_err());
        assert!(extract_key_ids_from_key_ids_init_data(br#"{"kids":[]}"#, 512).is_err());
        assert!(extract_key_ids_from_key_ids_init_data(br#"{"kids":["AQI="]}"#, 512).is_err());
    }
}
