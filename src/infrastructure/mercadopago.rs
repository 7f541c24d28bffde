use super::read_json;
use crate::config::MercadoPagoConfig;
use crate::domain::payment::MERCADOPAGO;
use crate::domain::ports::{PaymentGateway, Preference, PreferenceRequest};
use crate::error::GatewayError;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::instrument;

/// Mercado Pago REST client.
///
/// Every call authenticates with the configured bearer token; a missing
/// token is reported as a configuration failure at call time, so the rest of
/// the engine keeps working without payment credentials.
#[derive(Clone)]
pub struct MercadoPagoClient {
    http: reqwest::Client,
    base_url: String,
    access_token: Option<SecretString>,
}

impl MercadoPagoClient {
    pub fn new(config: &MercadoPagoConfig) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            access_token: config.access_token.clone(),
        })
    }

    fn token(&self) -> Result<&str, GatewayError> {
        self.access_token
            .as_ref()
            .map(|token| token.expose_secret())
            .ok_or_else(|| GatewayError::NotConfigured("MP_ACCESS_TOKEN".to_string()))
    }

    async fn get(&self, path: &str) -> Result<Value, GatewayError> {
        let token = self.token()?;
        let response = self
            .http
            .get(format!("{}{path}", self.base_url))
            .bearer_auth(token)
            .send()
            .await?;
        read_json(response).await
    }
}

fn is_localhost(site_url: &str) -> bool {
    let site = site_url.to_ascii_lowercase();
    site.contains("localhost") || site.contains("127.0.0.1")
}

/// Request body of `POST /checkout/preferences`.
///
/// Back URLs and auto return are omitted for local sites, which the provider
/// refuses as redirect targets.
pub fn preference_body(request: &PreferenceRequest) -> Value {
    let site = &request.site_url;
    let mut body = json!({
        "items": request.items,
        "external_reference": request.order_id,
        "notification_url": format!("{site}/api/webhooks/mercadopago"),
        "metadata": {
            "order_id": request.order_id,
            "user_id": request.user_id,
        },
    });

    if !is_localhost(site)
        && let Some(object) = body.as_object_mut()
    {
        let order_id = &request.order_id;
        object.insert(
            "back_urls".to_string(),
            json!({
                "success": format!("{site}/pay/success?orderId={order_id}"),
                "failure": format!("{site}/pay/failure?orderId={order_id}"),
                "pending": format!("{site}/pay/pending?orderId={order_id}"),
            }),
        );
        object.insert("auto_return".to_string(), json!("approved"));
    }
    body
}

#[async_trait]
impl PaymentGateway for MercadoPagoClient {
    fn provider(&self) -> &'static str {
        MERCADOPAGO
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_preference(
        &self,
        request: &PreferenceRequest,
    ) -> Result<Preference, GatewayError> {
        let token = self.token()?;
        let response = self
            .http
            .post(format!("{}/checkout/preferences", self.base_url))
            .bearer_auth(token)
            .json(&preference_body(request))
            .send()
            .await?;
        let data = read_json(response).await?;

        let id = data.get("id").and_then(Value::as_str);
        let init_point = data.get("init_point").and_then(Value::as_str);
        match (id, init_point) {
            (Some(id), Some(init_point)) => Ok(Preference {
                id: id.to_string(),
                init_point: init_point.to_string(),
            }),
            _ => Err(GatewayError::InvalidResponse(data.to_string())),
        }
    }

    #[instrument(skip(self))]
    async fn fetch_payment(&self, payment_id: &str) -> Result<Value, GatewayError> {
        self.get(&format!("/v1/payments/{payment_id}")).await
    }

    #[instrument(skip(self))]
    async fn fetch_merchant_order(&self, merchant_order_id: &str) -> Result<Value, GatewayError> {
        self.get(&format!("/merchant_orders/{merchant_order_id}"))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::{OrderId, UserId};
    use crate::domain::ports::PreferenceItem;
    use rust_decimal_macros::dec;

    fn request(site_url: &str) -> PreferenceRequest {
        PreferenceRequest {
            order_id: OrderId::new("o1"),
            user_id: UserId::new("u1"),
            items: vec![PreferenceItem {
                title: "Mate".into(),
                quantity: 2,
                unit_price: dec!(100.50),
                currency_id: "ARS".into(),
            }],
            site_url: site_url.to_string(),
        }
    }

    #[test]
    fn test_preference_body_for_public_site() {
        let body = preference_body(&request("https://shop.example"));
        assert_eq!(body["external_reference"], "o1");
        assert_eq!(body["metadata"]["user_id"], "u1");
        assert_eq!(
            body["notification_url"],
            "https://shop.example/api/webhooks/mercadopago"
        );
        assert_eq!(body["items"][0]["unit_price"], 100.5);
        assert_eq!(body["auto_return"], "approved");
        assert_eq!(
            body["back_urls"]["success"],
            "https://shop.example/pay/success?orderId=o1"
        );
    }

    #[test]
    fn test_preference_body_for_localhost() {
        let body = preference_body(&request("http://127.0.0.1:3000"));
        assert!(body.get("back_urls").is_none());
        assert!(body.get("auto_return").is_none());
    }

    #[tokio::test]
    async fn test_missing_token_is_not_configured() {
        let client = MercadoPagoClient::new(&MercadoPagoConfig {
            access_token: None,
            base_url: "http://127.0.0.1:9".into(),
            currency: "ARS".into(),
        })
        .unwrap();
        let err = client.fetch_payment("1").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotConfigured(_)));
    }
}
