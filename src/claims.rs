//! Extraction of structured claims from an opaque bearer token.
//!
//! The token is never verified here; the payload segment is only read so the
//! client can tell who is signed in and when the token stops being usable.

use crate::config::ClaimKeys;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

const LENIENT: GeneralPurposeConfig =
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent);
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT);
const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT);

/// Normalized view of a token payload. Missing fields are empty, never absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Claims {
    pub user_id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
    pub roles: Vec<String>,
    /// Expiry as epoch seconds; `None` when the token carries no usable expiry
    pub expires_at: Option<i64>,
}

impl Claims {
    /// Full name claim, else "first last", else empty
    pub fn display_name(&self) -> String {
        if !self.full_name.is_empty() {
            return self.full_name.clone();
        }
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    pub fn expires_at_datetime(&self) -> Option<DateTime<Utc>> {
        self.expires_at
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
    }

    /// A token without an expiry claim counts as expired
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(exp) => now.timestamp() >= exp,
            None => true,
        }
    }
}

/// Decodes bearer tokens using a configurable set of claim names
#[derive(Debug, Clone, Default)]
pub struct ClaimsDecoder {
    keys: ClaimKeys,
}

impl ClaimsDecoder {
    pub fn new(keys: ClaimKeys) -> Self {
        Self { keys }
    }

    /// Returns `None` for anything that is not a three-segment token with a
    /// base64 JSON object as its middle segment.
    pub fn decode(&self, token: &str) -> Option<Claims> {
        let payload = decode_payload(token)?;

        Some(Claims {
            user_id: first_string(&payload, &self.keys.user_id),
            email: first_string(&payload, &self.keys.email),
            first_name: first_string(&payload, &self.keys.first_name),
            last_name: first_string(&payload, &self.keys.last_name),
            full_name: first_string(&payload, &self.keys.full_name),
            roles: first_string_list(&payload, &self.keys.roles),
            expires_at: first_epoch(&payload, &self.keys.expires_at),
        })
    }
}

fn decode_payload(token: &str) -> Option<Map<String, Value>> {
    let segments: Vec<&str> = token.trim().split('.').collect();
    if segments.len() != 3 || segments[1].is_empty() {
        return None;
    }

    let raw = URL_SAFE_LENIENT
        .decode(segments[1])
        .or_else(|_| STANDARD_LENIENT.decode(segments[1]))
        .ok()?;

    match serde_json::from_slice::<Value>(&raw).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

fn first_string(payload: &Map<String, Value>, keys: &[String]) -> String {
    keys.iter()
        .filter_map(|key| match payload.get(key) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
        .next()
        .unwrap_or_default()
}

/// Role claims arrive either as a single string or as an array of strings
fn first_string_list(payload: &Map<String, Value>, keys: &[String]) -> Vec<String> {
    for key in keys {
        match payload.get(key) {
            Some(Value::String(s)) if !s.is_empty() => return vec![s.clone()],
            Some(Value::Array(items)) => {
                return items
                    .iter()
                    .filter_map(|v| v.as_str())
                    .map(str::to_string)
                    .collect();
            }
            _ => {}
        }
    }
    Vec::new()
}

fn first_epoch(payload: &Map<String, Value>, keys: &[String]) -> Option<i64> {
    keys.iter().find_map(|key| match payload.get(key)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    })
}
