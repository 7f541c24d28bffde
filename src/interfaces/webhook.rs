//! Resolution of inbound payment webhooks into a [`PaymentNotification`].
//!
//! The provider reports the topic and object id in the query string, the
//! JSON body, or both, depending on the notification flavour.

use crate::domain::payment::{PaymentNotification, scalar_string};
use serde_json::Value;

/// Reads topic and id from the query parameters first, then from the body.
///
/// An unparseable body should be passed as `Value::Null`; the notification
/// is still resolved from the query string.
pub fn payment_notification<'a, I>(query: I, body: &Value) -> PaymentNotification
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut query_topic = None;
    let mut query_type = None;
    let mut query_id = None;
    for (key, value) in query {
        let value = Some(value.trim()).filter(|v| !v.is_empty()).map(str::to_string);
        match key {
            "topic" => query_topic = query_topic.or(value),
            "type" => query_type = query_type.or(value),
            "id" => query_id = query_id.or(value),
            _ => {}
        }
    }

    let topic = query_topic
        .or(query_type)
        .or_else(|| scalar_string(body.get("type")))
        .or_else(|| scalar_string(body.get("topic")));

    let id = query_id
        .or_else(|| scalar_string(body.pointer("/data/id")))
        .or_else(|| scalar_string(body.get("id")))
        .or_else(|| {
            body.get("resource")
                .and_then(Value::as_str)
                .and_then(|resource| resource.rsplit('/').next())
                .map(str::trim)
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
        });

    PaymentNotification { topic, id }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NO_QUERY: [(&str, &str); 0] = [];

    #[test]
    fn test_query_wins_over_body() {
        let notification = payment_notification(
            [("topic", "merchant_order"), ("id", "77")],
            &json!({ "type": "payment", "data": { "id": "1" } }),
        );
        assert_eq!(notification.topic.as_deref(), Some("merchant_order"));
        assert_eq!(notification.id.as_deref(), Some("77"));
    }

    #[test]
    fn test_body_data_id() {
        let notification = payment_notification(NO_QUERY, &json!({ "type": "payment", "data": { "id": 123 } }));
        assert_eq!(notification.topic.as_deref(), Some("payment"));
        assert_eq!(notification.id.as_deref(), Some("123"));
    }

    #[test]
    fn test_resource_url() {
        let notification = payment_notification(
            NO_QUERY,
            &json!({ "topic": "merchant_order", "resource": "https://api.mercadolibre.com/merchant_orders/999" }),
        );
        assert_eq!(notification.id.as_deref(), Some("999"));
    }

    #[test]
    fn test_missing_everything() {
        assert_eq!(
            payment_notification(NO_QUERY, &Value::Null),
            PaymentNotification::default()
        );
    }
}
