//! Adapters for the domain ports: storage, provider HTTP clients and mail.

pub mod epick;
pub mod in_memory;
pub mod mercadopago;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
pub mod smtp;
pub mod token_cache;

use crate::error::GatewayError;
use serde_json::Value;

/// Reads a provider response as JSON, turning non-2xx answers into errors.
pub(crate) async fn read_json(response: reqwest::Response) -> Result<Value, GatewayError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(GatewayError::Status {
            status: status.as_u16(),
            body,
        });
    }
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&body).map_err(|e| GatewayError::InvalidResponse(e.to_string()))
}
