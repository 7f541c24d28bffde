use super::ids::{OrderId, ShipmentEventId, ShipmentId};
use super::payment::scalar_string;
use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Status of a shipment as reported by the carrier.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
pub enum ShipmentStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "PAYED")]
    Payed,
    #[serde(rename = "CONFIRMED")]
    Confirmed,
    #[serde(rename = "COLLECTED")]
    Collected,
    #[serde(rename = "DELIVERED-TO-SERVICE")]
    DeliveredToService,
    #[serde(rename = "DELIVERED")]
    Delivered,
    #[serde(rename = "CANCELED")]
    Canceled,
}

impl ShipmentStatus {
    pub const ALL: [Self; 7] = [
        Self::Pending,
        Self::Payed,
        Self::Confirmed,
        Self::Collected,
        Self::DeliveredToService,
        Self::Delivered,
        Self::Canceled,
    ];

    /// Normalizes a carrier label. Unknown or empty labels become `PENDING`.
    pub fn normalize(raw: Option<&str>) -> Self {
        let label = raw.map(|s| s.trim().to_ascii_uppercase()).unwrap_or_default();
        match label.as_str() {
            "PAYED" => Self::Payed,
            "CONFIRMED" => Self::Confirmed,
            "COLLECTED" => Self::Collected,
            "DELIVERED-TO-SERVICE" => Self::DeliveredToService,
            "DELIVERED" => Self::Delivered,
            "CANCELED" | "CANCELLED" => Self::Canceled,
            _ => Self::Pending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Payed => "PAYED",
            Self::Confirmed => "CONFIRMED",
            Self::Collected => "COLLECTED",
            Self::DeliveredToService => "DELIVERED-TO-SERVICE",
            Self::Delivered => "DELIVERED",
            Self::Canceled => "CANCELED",
        }
    }

    /// Transition guard applied to every carrier-reported status change.
    pub fn can_transition_to(self, to: Self) -> bool {
        use ShipmentStatus::*;
        if self == to {
            return true;
        }
        match to {
            Confirmed => self == Payed,
            Payed => self == Pending,
            Collected => matches!(self, Confirmed | Payed),
            DeliveredToService => self == Collected,
            Delivered => matches!(self, DeliveredToService | Collected),
            Canceled => self != Delivered,
            Pending => false,
        }
    }
}

impl fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Guard over raw carrier labels; both sides are normalized first.
pub fn can_transition(from: &str, to: &str) -> bool {
    ShipmentStatus::normalize(Some(from)).can_transition_to(ShipmentStatus::normalize(Some(to)))
}

/// Reads the status label from a carrier payload (`status_name`, then `status`).
pub fn status_label(payload: &Value) -> Option<&str> {
    payload
        .get("status_name")
        .and_then(Value::as_str)
        .or_else(|| payload.get("status").and_then(Value::as_str))
}

/// Local record of the carrier shipment for an order. One per order.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct ShipmentRecord {
    pub id: ShipmentId,
    pub order_id: OrderId,
    /// `None` while the carrier call that creates the shipment is in flight.
    pub external_id: Option<String>,
    pub sender_code: Option<String>,
    pub status: ShipmentStatus,
    pub payment_url: Option<String>,
    pub checkout_url: Option<String>,
    pub preference_id: Option<String>,
    pub qr_image: Option<String>,
    pub last_payload: Option<String>,
    pub last_tracking: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ShipmentRecord {
    pub fn placeholder(order_id: OrderId, now: DateTime<Utc>) -> Self {
        Self {
            id: ShipmentId::generate(),
            order_id,
            external_id: None,
            sender_code: None,
            status: ShipmentStatus::Pending,
            payment_url: None,
            checkout_url: None,
            preference_id: None,
            qr_image: None,
            last_payload: None,
            last_tracking: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.external_id.is_none()
    }

    /// Fills a placeholder with the carrier's create-shipment response.
    pub fn fill_from_carrier(&mut self, response: &Value, now: DateTime<Utc>) -> Result<()> {
        let external_id = scalar_string(response.get("id"))
            .or_else(|| scalar_string(response.get("order_id")))
            .ok_or_else(|| {
                EngineError::ValidationError("carrier response has no shipment id".to_string())
            })?;
        self.external_id = Some(external_id);
        self.sender_code = scalar_string(response.get("sender_code"))
            .or_else(|| scalar_string(response.get("senderCode")));
        self.status = ShipmentStatus::normalize(status_label(response));
        self.payment_url = scalar_string(response.get("mp_url"));
        self.checkout_url = scalar_string(response.get("cho_url"));
        self.preference_id = scalar_string(response.get("preference_id"));
        self.qr_image = scalar_string(response.get("qr_image"));
        self.last_payload = Some(response.to_string());
        self.updated_at = now;
        Ok(())
    }

    /// Moves to `next` if the guard allows it. Returns whether the status was applied.
    pub fn advance(&mut self, next: ShipmentStatus, now: DateTime<Utc>) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            self.updated_at = now;
            true
        } else {
            false
        }
    }
}

/// A carrier status callback, normalized at the boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct ShipmentCallback {
    pub external_id: String,
    pub sender_code: String,
    pub status: ShipmentStatus,
    pub raw: String,
}

impl ShipmentCallback {
    pub fn from_raw(raw: &Value) -> Result<Self> {
        let external_id =
            scalar_string(raw.get("id")).or_else(|| scalar_string(raw.get("order_id")));
        let sender_code = scalar_string(raw.get("sender_code"))
            .or_else(|| scalar_string(raw.get("senderCode")));

        match (external_id, sender_code) {
            (Some(external_id), Some(sender_code)) => Ok(Self {
                external_id,
                sender_code,
                status: ShipmentStatus::normalize(status_label(raw)),
                raw: raw.to_string(),
            }),
            _ => Err(EngineError::ValidationError(
                "shipment webhook requires id and sender code".to_string(),
            )),
        }
    }
}

/// Append-only audit entry for every carrier callback received.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct ShipmentWebhookEvent {
    pub id: ShipmentEventId,
    pub shipment_id: ShipmentId,
    pub payload: String,
    pub received_at: DateTime<Utc>,
}

impl ShipmentWebhookEvent {
    pub fn new(shipment_id: ShipmentId, payload: String, received_at: DateTime<Utc>) -> Self {
        Self {
            id: ShipmentEventId::generate(),
            shipment_id,
            payload,
            received_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum LabelFormat {
    #[default]
    Normal,
    Thermal,
}

impl LabelFormat {
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("thermal") {
            Self::Thermal
        } else {
            Self::Normal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Thermal => "thermal",
        }
    }
}

/// A printable label document returned by the carrier.
#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_transition_guard() {
        assert!(!can_transition("PENDING", "DELIVERED"));
        assert!(can_transition("PAYED", "CONFIRMED"));
        assert!(!can_transition("DELIVERED", "CANCELED"));
        for status in ShipmentStatus::ALL {
            assert!(status.can_transition_to(status), "{status}");
        }
    }

    #[test]
    fn test_transition_table() {
        use ShipmentStatus::*;
        assert!(Pending.can_transition_to(Payed));
        assert!(!Pending.can_transition_to(Confirmed));
        assert!(Payed.can_transition_to(Collected));
        assert!(Confirmed.can_transition_to(Collected));
        assert!(!Pending.can_transition_to(Collected));
        assert!(Collected.can_transition_to(DeliveredToService));
        assert!(!Confirmed.can_transition_to(DeliveredToService));
        assert!(Collected.can_transition_to(Delivered));
        assert!(DeliveredToService.can_transition_to(Delivered));
        assert!(Collected.can_transition_to(Canceled));
        assert!(!Payed.can_transition_to(Pending));
        assert!(!Canceled.can_transition_to(Payed));
    }

    #[test]
    fn test_normalize_labels() {
        assert_eq!(ShipmentStatus::normalize(Some(" payed ")), ShipmentStatus::Payed);
        assert_eq!(ShipmentStatus::normalize(Some("CANCELLED")), ShipmentStatus::Canceled);
        assert_eq!(ShipmentStatus::normalize(Some("LOST")), ShipmentStatus::Pending);
        assert_eq!(ShipmentStatus::normalize(None), ShipmentStatus::Pending);
    }

    #[test]
    fn test_fill_from_carrier() {
        let mut record = ShipmentRecord::placeholder(OrderId::new("o1"), Utc::now());
        let response = json!({
            "id": 9001,
            "sender_code": "SND1",
            "status_name": "payed",
            "mp_url": "https://pay.example/9001"
        });
        record.fill_from_carrier(&response, Utc::now()).unwrap();
        assert_eq!(record.external_id.as_deref(), Some("9001"));
        assert_eq!(record.sender_code.as_deref(), Some("SND1"));
        assert_eq!(record.status, ShipmentStatus::Payed);
        assert!(!record.is_placeholder());
    }

    #[test]
    fn test_callback_requires_sender_code() {
        assert!(ShipmentCallback::from_raw(&json!({ "id": "1", "status": "PAYED" })).is_err());
        let callback =
            ShipmentCallback::from_raw(&json!({ "order_id": 1, "senderCode": "S", "status": "collected" }))
                .unwrap();
        assert_eq!(callback.external_id, "1");
        assert_eq!(callback.status, ShipmentStatus::Collected);
    }

    #[test]
    fn test_label_format() {
        assert_eq!(LabelFormat::parse("THERMAL"), LabelFormat::Thermal);
        assert_eq!(LabelFormat::parse("anything"), LabelFormat::Normal);
    }
}
