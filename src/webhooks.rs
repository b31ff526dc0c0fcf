//! Webhook execution contract: payload marshaling and request signing.
//!
//! The fan-out worker publishes one [`WebhookExecutionRequest`] per matching
//! webhook registration. The executor re-fetches the registration, marshals
//! the envelope into the registered content type, signs the body with the
//! household key, and delivers it.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use tracing::warn;

use crate::envelope::DataChangeMessage;

/// Header carrying the hex-encoded HMAC-SHA256 of the request body.
pub const SIGNATURE_HEADER: &str = "X-Dinner-Done-Better-Signature";

/// Message published to the webhook-execution topic: one delivery to one
/// registered webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookExecutionRequest {
    #[serde(rename = "webhookID")]
    pub webhook_id: String,

    #[serde(rename = "householdID")]
    pub household_id: String,

    pub payload: DataChangeMessage,
}

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("marshaling payload as JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("marshaling payload as XML: {0}")]
    Xml(#[from] quick_xml::SeError),

    #[error("household webhook key is not valid hex: {0}")]
    InvalidKey(#[from] hex::FromHexError),

    #[error("delivering webhook: {0}")]
    Delivery(String),
}

/// Marshal the envelope into the webhook's registered content type.
///
/// Unrecognized content types produce an empty body rather than an error:
/// the delivery still happens (and still carries a valid signature over the
/// empty body) so the receiver learns the event fired.
pub fn marshal_payload(
    content_type: &str,
    payload: &DataChangeMessage,
) -> Result<Vec<u8>, WebhookError> {
    match content_type {
        "application/json" => Ok(serde_json::to_vec(payload)?),
        "application/xml" => {
            let xml = quick_xml::se::to_string_with_root("dataChangeMessage", payload)?;
            Ok(xml.into_bytes())
        }
        other => {
            warn!(content_type = %other, "unrecognized webhook content type, sending empty body");
            Ok(Vec::new())
        }
    }
}

/// Sign the marshaled body with the household's hex-encoded HMAC-SHA256 key,
/// returning the hex digest for [`SIGNATURE_HEADER`].
pub fn sign_payload(hex_key: &str, body: &[u8]) -> Result<String, WebhookError> {
    let key = hex::decode(hex_key)?;

    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&key)
        .map_err(|e| WebhookError::Delivery(e.to_string()))?;
    mac.update(body);

    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::ServiceEventType;

    const KEY: &str = "deadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeef";

    #[test]
    fn json_marshal_carries_the_event_type() {
        let msg = DataChangeMessage::new(ServiceEventType::RecipeCreated).with_household("h1");
        let body = marshal_payload("application/json", &msg).unwrap();
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("\"eventType\":\"recipe_created\""));
        assert!(text.contains("\"householdID\":\"h1\""));
    }

    #[test]
    fn unknown_content_type_yields_empty_body() {
        let msg = DataChangeMessage::new(ServiceEventType::RecipeCreated);
        let body = marshal_payload("text/csv", &msg).unwrap();
        assert!(body.is_empty());
    }

    #[test]
    fn signature_is_deterministic() {
        let a = sign_payload(KEY, b"hello").unwrap();
        let b = sign_payload(KEY, b"hello").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn signature_changes_with_the_body() {
        let a = sign_payload(KEY, b"hello").unwrap();
        let b = sign_payload(KEY, b"hellp").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn non_hex_key_is_rejected() {
        assert!(matches!(
            sign_payload("not hex", b"hello"),
            Err(WebhookError::InvalidKey(_))
        ));
    }

    #[test]
    fn execution_request_wire_names() {
        let req = WebhookExecutionRequest {
            webhook_id: "w1".into(),
            household_id: "h1".into(),
            payload: DataChangeMessage::new(ServiceEventType::MealCreated),
        };

        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["webhookID"], "w1");
        assert_eq!(value["householdID"], "h1");
        assert_eq!(value["payload"]["eventType"], "meal_created");
    }
}
