//! Shopify order webhook.
//!
//! Verification is fail-closed: a missing secret, missing signature, or
//! mismatched HMAC yields 403 and the payload is discarded. A verified
//! delivery becomes one `order_delivered` event keyed by order id, so
//! Shopify's redeliveries are idempotent.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{info, warn};

use chomp_core::{ChompError, EventBody, NewEvent};
use chomp_engine::ingest_detached;

use crate::api::ApiError;
use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

const HMAC_HEADER: &str = "x-shopify-hmac-sha256";

/// Verify the webhook body against the signature header.
pub fn verify_signature(secret: &str, body: &[u8], signature_b64: &str) -> bool {
    let Ok(signature) = BASE64.decode(signature_b64.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&signature).is_ok()
}

#[derive(Deserialize)]
struct OrderPayload {
    id: serde_json::Value,
    customer: Option<CustomerPayload>,
    #[serde(default)]
    line_items: Vec<LineItem>,
}

#[derive(Deserialize)]
struct CustomerPayload {
    id: serde_json::Value,
}

#[derive(Deserialize)]
struct LineItem {
    product_id: Option<serde_json::Value>,
}

fn id_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub async fn order_delivered(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let Some(secret) = state.config.shopify.api_secret.as_deref() else {
        // No secret configured: the endpoint is disabled, never open.
        warn!("Order webhook rejected: SHOPIFY_API_SECRET not configured");
        return Err(ApiError(ChompError::Forbidden(
            "webhook verification unavailable".to_string(),
        )));
    };

    let signature = headers
        .get(HMAC_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ChompError::Forbidden("missing webhook signature".to_string()))?;

    if !verify_signature(secret, &body, signature) {
        warn!("Order webhook rejected: HMAC mismatch");
        return Err(ApiError(ChompError::Forbidden(
            "webhook signature mismatch".to_string(),
        )));
    }

    let payload: OrderPayload = serde_json::from_slice(&body)
        .map_err(|e| ChompError::Validation(format!("malformed order payload: {}", e)))?;
    let Some(customer) = payload.customer else {
        // Orders without a customer cannot feed anyone's progress.
        return Ok(StatusCode::OK);
    };

    let order_id = id_string(&payload.id);
    let product_ids: Vec<String> = payload
        .line_items
        .iter()
        .filter_map(|item| item.product_id.as_ref())
        .map(id_string)
        .collect();

    info!(
        order_id = %order_id,
        products = product_ids.len(),
        "Verified order delivery webhook"
    );

    let event = NewEvent {
        user_id: id_string(&customer.id),
        source_id: format!("order:{}", order_id),
        body: EventBody::OrderDelivered {
            order_id,
            product_ids,
        },
    };
    tokio::spawn(ingest_detached(Arc::clone(&state.engine), event));

    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        BASE64.encode(mac.finalize().into_bytes())
    }

    #[test]
    fn valid_signature_verifies() {
        let body = br#"{"id":1,"line_items":[]}"#;
        let sig = sign("shhh", body);
        assert!(verify_signature("shhh", body, &sig));
    }

    #[test]
    fn tampered_body_fails() {
        let sig = sign("shhh", b"original");
        assert!(!verify_signature("shhh", b"tampered", &sig));
    }

    #[test]
    fn wrong_secret_fails() {
        let body = b"payload";
        let sig = sign("secret-a", body);
        assert!(!verify_signature("secret-b", body, &sig));
    }

    #[test]
    fn garbage_signature_fails() {
        assert!(!verify_signature("shhh", b"payload", "not base64 at all!"));
    }
}
