use super::read_json;
use super::token_cache::{AccessToken, CredentialCache, TokenSource};
use crate::config::EpickConfig;
use crate::domain::ports::{QuoteRequest, ShipmentRequest, ShippingCarrier};
use crate::domain::shipment::{Label, LabelFormat};
use crate::error::GatewayError;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{instrument, warn};

const DEFAULT_LABEL_CONTENT_TYPE: &str = "application/pdf";

/// Phone/password login against the E-Pick user API.
struct EpickLogin {
    http: reqwest::Client,
    base_url: String,
    phone: Option<String>,
    password: Option<SecretString>,
}

#[async_trait]
impl TokenSource for EpickLogin {
    #[instrument(skip(self))]
    async fn login(&self) -> Result<AccessToken, GatewayError> {
        let (Some(phone), Some(password)) = (&self.phone, &self.password) else {
            return Err(GatewayError::NotConfigured(
                "EPICK_PHONE/EPICK_PASSWORD".to_string(),
            ));
        };

        let response = self
            .http
            .post(format!("{}/api/users/login", self.base_url))
            .json(&json!({
                "phone": phone,
                "password": password.expose_secret(),
                "source": "BACKEND",
            }))
            .send()
            .await?;
        let data = read_json(response).await?;

        let token = data
            .get("token")
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| GatewayError::InvalidResponse("login returned no token".to_string()))?;
        Ok(AccessToken::with_default_ttl(token.to_string(), Utc::now()))
    }
}

/// E-Pick REST client.
///
/// The access token is cached in a [`CredentialCache`]; a `401` answer drops
/// it and the request is retried once with a fresh login.
#[derive(Clone)]
pub struct EpickClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Arc<CredentialCache>,
}

fn http_client() -> Result<reqwest::Client, GatewayError> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?)
}

impl EpickClient {
    /// Builds the token cache backed by the configured phone/password login.
    pub fn login_cache(config: &EpickConfig) -> Result<Arc<CredentialCache>, GatewayError> {
        let login = EpickLogin {
            http: http_client()?,
            base_url: config.base_url.clone(),
            phone: config.phone.clone(),
            password: config.password.clone(),
        };
        Ok(Arc::new(CredentialCache::new(Arc::new(login))))
    }

    pub fn new(
        config: &EpickConfig,
        credentials: Arc<CredentialCache>,
    ) -> Result<Self, GatewayError> {
        Ok(Self {
            http: http_client()?,
            base_url: config.base_url.clone(),
            credentials,
        })
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        token: &str,
    ) -> Result<reqwest::Response, GatewayError> {
        let mut request = self
            .http
            .request(method, format!("{}{path}", self.base_url))
            .header("Accept", "application/json")
            .header("x-access-token", token);
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, GatewayError> {
        let token = self.credentials.get_valid_token().await?;
        let mut response = self.send(method.clone(), path, body, &token).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            warn!(path, "E-Pick rejected the cached token, logging in again");
            self.credentials.invalidate(&token).await;
            let token = self.credentials.get_valid_token().await?;
            response = self.send(method, path, body, &token).await?;
        }
        read_json(response).await
    }
}

#[async_trait]
impl ShippingCarrier for EpickClient {
    #[instrument(skip(self, request))]
    async fn quote(&self, request: &QuoteRequest) -> Result<Value, GatewayError> {
        let body = serde_json::to_value(request)
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        self.request(Method::POST, "/api/orders/calculator/www", Some(&body))
            .await
    }

    #[instrument(skip(self, request))]
    async fn create_shipment(&self, request: &ShipmentRequest) -> Result<Value, GatewayError> {
        let body = serde_json::to_value(request)
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        self.request(
            Method::POST,
            "/api/orders/integrations/confirm-order",
            Some(&body),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn tracking(&self, external_id: &str) -> Result<Value, GatewayError> {
        self.request(
            Method::GET,
            &format!("/api/orders/tracking/{external_id}"),
            None,
        )
        .await
    }

    #[instrument(skip(self))]
    async fn confirm_pickup(
        &self,
        external_id: &str,
        sender_code: &str,
    ) -> Result<Value, GatewayError> {
        self.request(
            Method::GET,
            &format!("/api/orders/confirm/{external_id}/{sender_code}"),
            None,
        )
        .await
    }

    #[instrument(skip(self))]
    async fn labels(
        &self,
        external_ids: &[String],
        format: LabelFormat,
    ) -> Result<Label, GatewayError> {
        let token = self.credentials.get_valid_token().await?;
        let url = format!(
            "{}/api/orders/label/{}/{}",
            self.base_url,
            external_ids.join(","),
            format.as_str()
        );
        let response = self.http.get(url).query(&[("token", token)]).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or(DEFAULT_LABEL_CONTENT_TYPE)
            .to_string();
        let bytes = response.bytes().await?.to_vec();
        Ok(Label {
            content_type,
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config() -> EpickConfig {
        EpickConfig {
            base_url: "http://127.0.0.1:9".into(),
            phone: None,
            password: None,
        }
    }

    struct FixedLogin {
        logins: AtomicUsize,
    }

    #[async_trait]
    impl TokenSource for FixedLogin {
        async fn login(&self) -> Result<AccessToken, GatewayError> {
            self.logins.fetch_add(1, Ordering::SeqCst);
            Ok(AccessToken::with_default_ttl("fixed".to_string(), Utc::now()))
        }
    }

    #[tokio::test]
    async fn test_missing_credentials_fail_before_any_request() {
        let config = config();
        let client = EpickClient::new(&config, EpickClient::login_cache(&config).unwrap()).unwrap();
        let err = client.tracking("1").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn test_clients_share_an_injected_cache() {
        let login = Arc::new(FixedLogin {
            logins: AtomicUsize::new(0),
        });
        let credentials = Arc::new(CredentialCache::new(login.clone()));
        let first = EpickClient::new(&config(), credentials.clone()).unwrap();
        let second = EpickClient::new(&config(), credentials.clone()).unwrap();

        // Nothing listens on the port, so both requests fail after the login.
        assert!(first.tracking("1").await.is_err());
        assert!(second.tracking("1").await.is_err());
        assert_eq!(login.logins.load(Ordering::SeqCst), 1);
        assert_eq!(credentials.get_valid_token().await.unwrap(), "fixed");
    }
}
