use super::ids::{OrderId, PaymentId};
use super::order::OrderStatus;
use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Provider tag stored on every payment row.
pub const MERCADOPAGO: &str = "mercadopago";

/// Raw provider payloads are truncated to this many characters before storage.
pub const RAW_PAYLOAD_LIMIT: usize = 4000;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
    Refunded,
    Unknown,
}

impl PaymentStatus {
    /// Maps the provider vocabulary onto the closed status set.
    pub fn normalize(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Self::Unknown;
        };
        match raw.trim().to_ascii_lowercase().as_str() {
            "approved" => Self::Approved,
            "rejected" => Self::Rejected,
            "cancelled" => Self::Cancelled,
            "refunded" | "charged_back" => Self::Refunded,
            "pending" | "in_process" | "authorized" => Self::Pending,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
            Self::Unknown => "unknown",
        }
    }

    /// The status an unpaid order is closed with when this payment outcome arrives.
    pub fn closing_outcome(self) -> Option<OrderStatus> {
        match self {
            Self::Rejected | Self::Cancelled => Some(OrderStatus::Cancelled),
            Self::Refunded => Some(OrderStatus::Refunded),
            _ => None,
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Truncates a payload snapshot to [`RAW_PAYLOAD_LIMIT`] characters.
pub fn truncate_payload(payload: String) -> String {
    match payload.char_indices().nth(RAW_PAYLOAD_LIMIT) {
        Some((cut, _)) => payload[..cut].to_string(),
        None => payload,
    }
}

/// A provider payment notification, normalized at the boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentEvent {
    pub external_id: String,
    pub status: PaymentStatus,
    /// Local order the provider associates the payment with, if any.
    pub order_ref: Option<OrderId>,
    pub preference_id: Option<String>,
    pub raw: String,
}

impl PaymentEvent {
    /// Extracts the normalized fields from a raw provider payment object.
    pub fn from_raw(raw: &Value) -> Result<Self> {
        let external_id = scalar_string(raw.get("id")).ok_or_else(|| {
            EngineError::ValidationError("payment event has no id".to_string())
        })?;

        let order_ref = non_empty_str(raw.pointer("/metadata/order_id"))
            .or_else(|| non_empty_str(raw.get("external_reference")))
            .or_else(|| non_empty_str(raw.pointer("/additional_info/items/0/id")))
            .map(OrderId::new);

        Ok(Self {
            external_id,
            status: Self::status_of(raw),
            order_ref,
            preference_id: scalar_string(raw.get("preference_id")),
            raw: truncate_payload(raw.to_string()),
        })
    }

    fn status_of(raw: &Value) -> PaymentStatus {
        PaymentStatus::normalize(raw.get("status").and_then(Value::as_str))
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Reads a JSON string or number as a trimmed, non-empty string.
pub(crate) fn scalar_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// An inbound provider notification: which kind of object changed, and its id.
///
/// The notification itself carries no payment state; the object is fetched
/// from the provider before reconciling.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PaymentNotification {
    pub topic: Option<String>,
    pub id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Payment {
    pub id: PaymentId,
    /// `None` marks the unresolved bucket: the provider gave no usable order reference.
    pub order_id: Option<OrderId>,
    pub provider: String,
    pub external_id: Option<String>,
    pub status: PaymentStatus,
    pub preference_id: Option<String>,
    pub init_point: Option<String>,
    pub raw_payload: Option<String>,
    pub pending_at: DateTime<Utc>,
    pub pending_reminder_sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// The initial payment attempt created together with an order.
    pub fn pending(order_id: OrderId, provider: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: PaymentId::generate(),
            order_id: Some(order_id),
            provider: provider.to_string(),
            external_id: None,
            status: PaymentStatus::Pending,
            preference_id: None,
            init_point: None,
            raw_payload: None,
            pending_at: now,
            pending_reminder_sent_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn from_event(
        event: &PaymentEvent,
        order_id: Option<OrderId>,
        provider: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PaymentId::generate(),
            order_id,
            provider: provider.to_string(),
            external_id: Some(event.external_id.clone()),
            status: event.status,
            preference_id: event.preference_id.clone(),
            init_point: None,
            raw_payload: Some(event.raw.clone()),
            pending_at: now,
            pending_reminder_sent_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies a replayed or newer notification to an existing row.
    ///
    /// Only status and payload change; the external and preference ids are
    /// filled in when still missing and never overwritten. The owning order
    /// is left to the caller, which knows whether the reference resolves.
    pub fn apply_event(&mut self, event: &PaymentEvent, now: DateTime<Utc>) {
        if event.status == PaymentStatus::Pending && self.status != PaymentStatus::Pending {
            self.pending_at = now;
        }
        self.status = event.status;
        self.raw_payload = Some(event.raw.clone());
        if self.external_id.is_none() {
            self.external_id = Some(event.external_id.clone());
        }
        if self.preference_id.is_none() {
            self.preference_id = event.preference_id.clone();
        }
        self.updated_at = now;
    }

    /// Withdraws a payment attempt whose order was cancelled.
    pub fn cancel_if_pending(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != PaymentStatus::Pending {
            return false;
        }
        self.status = PaymentStatus::Cancelled;
        self.updated_at = now;
        true
    }

    /// Whether the stalled-payment sweep should remind the buyer.
    pub fn needs_reminder(&self, cutoff: DateTime<Utc>) -> bool {
        self.status == PaymentStatus::Pending
            && self.order_id.is_some()
            && self.pending_reminder_sent_at.is_none()
            && self.pending_at <= cutoff
    }

    pub fn has_key(&self, provider: &str, external_id: &str) -> bool {
        self.provider == provider && self.external_id.as_deref() == Some(external_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_vocabulary() {
        use PaymentStatus::*;
        let cases = [
            (Some("approved"), Approved),
            (Some("APPROVED"), Approved),
            (Some("rejected"), Rejected),
            (Some("cancelled"), Cancelled),
            (Some("refunded"), Refunded),
            (Some("charged_back"), Refunded),
            (Some("in_process"), Pending),
            (Some("authorized"), Pending),
            (Some("pending"), Pending),
            (Some("in_mediation"), Unknown),
            (None, Unknown),
        ];
        for (raw, expected) in cases {
            assert_eq!(PaymentStatus::normalize(raw), expected, "{raw:?}");
        }
    }

    #[test]
    fn test_event_prefers_metadata_order_id() {
        let raw = json!({
            "id": 123456,
            "status": "approved",
            "metadata": { "order_id": "order-1" },
            "external_reference": "order-2"
        });
        let event = PaymentEvent::from_raw(&raw).unwrap();
        assert_eq!(event.external_id, "123456");
        assert_eq!(event.order_ref, Some(OrderId::new("order-1")));
        assert_eq!(event.status, PaymentStatus::Approved);
    }

    #[test]
    fn test_event_falls_back_to_item_reference() {
        let raw = json!({
            "id": "abc",
            "status": "pending",
            "additional_info": { "items": [{ "id": "order-9" }] }
        });
        let event = PaymentEvent::from_raw(&raw).unwrap();
        assert_eq!(event.order_ref, Some(OrderId::new("order-9")));
    }

    #[test]
    fn test_event_without_reference_is_unresolved() {
        let event = PaymentEvent::from_raw(&json!({ "id": 1, "status": "approved" })).unwrap();
        assert_eq!(event.order_ref, None);
    }

    #[test]
    fn test_event_without_id_is_rejected() {
        assert!(matches!(
            PaymentEvent::from_raw(&json!({ "status": "approved" })),
            Err(EngineError::ValidationError(_))
        ));
    }

    #[test]
    fn test_truncate_payload() {
        let long = "é".repeat(RAW_PAYLOAD_LIMIT + 10);
        assert_eq!(truncate_payload(long).chars().count(), RAW_PAYLOAD_LIMIT);
        assert_eq!(truncate_payload("short".into()), "short");
    }

    #[test]
    fn test_apply_event_keeps_identity() {
        let now = Utc::now();
        let mut payment = Payment::pending(OrderId::new("o1"), MERCADOPAGO, now);
        let event = PaymentEvent::from_raw(&json!({
            "id": 7,
            "status": "rejected",
            "external_reference": "other"
        }))
        .unwrap();
        payment.apply_event(&event, now);
        assert_eq!(payment.order_id, Some(OrderId::new("o1")));
        assert_eq!(payment.external_id.as_deref(), Some("7"));
        assert_eq!(payment.status, PaymentStatus::Rejected);
    }

    #[test]
    fn test_cancel_if_pending() {
        let now = Utc::now();
        let mut payment = Payment::pending(OrderId::new("o1"), MERCADOPAGO, now);
        assert!(payment.cancel_if_pending(now));
        assert_eq!(payment.status, PaymentStatus::Cancelled);
        assert!(!payment.cancel_if_pending(now));
    }

    #[test]
    fn test_needs_reminder() {
        let now = Utc::now();
        let mut payment = Payment::pending(OrderId::new("o1"), MERCADOPAGO, now);
        assert!(!payment.needs_reminder(now - chrono::Duration::minutes(10)));
        assert!(payment.needs_reminder(now));
        payment.pending_reminder_sent_at = Some(now);
        assert!(!payment.needs_reminder(now));
    }
}
