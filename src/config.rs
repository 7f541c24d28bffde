//! Runtime configuration loaded from environment variables.
//!
//! A `.env` file in the working directory is loaded first when present.
//!
//! # Environment Variables
//!
//! ## Payment provider
//! - `MP_ACCESS_TOKEN` - Mercado Pago bearer token (required to create preferences
//!   or fetch payments)
//! - `MP_BASE_URL` - API base (default: `https://api.mercadopago.com`)
//! - `MP_CURRENCY` - Currency of preference items (default: `ARS`)
//!
//! ## Shipment provider
//! - `EPICK_BASE_URL` - API base (default: `https://dev-ar.e-pick.com.ar`)
//! - `EPICK_PHONE`, `EPICK_PASSWORD` - Login credentials
//! - `EPICK_WEBHOOK_URL` - Callback URL registered with every shipment
//! - `EPICK_PKG_LONG`, `EPICK_PKG_WIDTH`, `EPICK_PKG_HEIGHT`, `EPICK_PKG_WEIGHT` -
//!   Package defaults (30, 20, 10, 1)
//! - `EPICK_SENDER_POSTAL_CODE`, `_NAME`, `_PHONE`, `_EMAIL`, `_STREET`, `_NUMBER`,
//!   `_CITY`, `_PROVINCE` - Sender block; `_EXTRA` and `_INFO` are optional
//! - `EPICK_ADDRESSEE_PROVINCE` - Province for every addressee (default: the order's city)
//!
//! ## Mail
//! - `SMTP_HOST`, `SMTP_USER`, `SMTP_PASS`, `SMTP_FROM` - Mail is only sent when all are set
//! - `SMTP_PORT` - default 587
//!
//! ## Other
//! - `SITE_URL` - Public storefront URL used in links (default: `http://localhost:3000`)
//! - `REMINDER_CUTOFF_MINUTES` - Inactivity before a reminder (default: 10, at most
//!   one year)
//! - `REMINDER_BATCH_SIZE` - Reminders per sweep and kind (default: 50)

use crate::domain::ports::AddressBlock;
use crate::error::{EngineError, GatewayError, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::SecretString;
use std::str::FromStr;

pub const DEFAULT_SITE_URL: &str = "http://localhost:3000";
pub const MAX_REMINDER_CUTOFF_MINUTES: i64 = 60 * 24 * 365;
pub const DEFAULT_MP_BASE_URL: &str = "https://api.mercadopago.com";
pub const DEFAULT_EPICK_BASE_URL: &str = "https://dev-ar.e-pick.com.ar";

#[derive(Debug, Clone)]
pub struct Config {
    pub site_url: String,
    pub mercadopago: MercadoPagoConfig,
    pub epick: EpickConfig,
    pub shipping: ShippingConfig,
    pub smtp: Option<SmtpConfig>,
    pub reminders: ReminderConfig,
}

#[derive(Debug, Clone)]
pub struct MercadoPagoConfig {
    pub access_token: Option<SecretString>,
    pub base_url: String,
    pub currency: String,
}

#[derive(Debug, Clone)]
pub struct EpickConfig {
    pub base_url: String,
    pub phone: Option<String>,
    pub password: Option<SecretString>,
}

/// Package dimensions in centimeters, weight in kilograms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PackageDefaults {
    pub long: Decimal,
    pub width: Decimal,
    pub height: Decimal,
    pub weight: Decimal,
}

impl Default for PackageDefaults {
    fn default() -> Self {
        Self {
            long: dec!(30),
            width: dec!(20),
            height: dec!(10),
            weight: dec!(1),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SenderConfig {
    pub postal_code: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub street: Option<String>,
    pub number: Option<String>,
    pub city: Option<String>,
    pub province: Option<String>,
    pub extra: Option<String>,
    pub info: Option<String>,
}

impl SenderConfig {
    /// Builds the carrier sender block, naming the first missing variable.
    pub fn block(&self) -> std::result::Result<AddressBlock, GatewayError> {
        fn required(value: &Option<String>, var: &str) -> std::result::Result<String, GatewayError> {
            value
                .clone()
                .ok_or_else(|| GatewayError::NotConfigured(var.to_string()))
        }

        Ok(AddressBlock {
            postal_code: required(&self.postal_code, "EPICK_SENDER_POSTAL_CODE")?,
            name: required(&self.name, "EPICK_SENDER_NAME")?,
            phone: required(&self.phone, "EPICK_SENDER_PHONE")?,
            email: required(&self.email, "EPICK_SENDER_EMAIL")?,
            street: required(&self.street, "EPICK_SENDER_STREET")?,
            number: required(&self.number, "EPICK_SENDER_NUMBER")?,
            city: required(&self.city, "EPICK_SENDER_CITY")?,
            province: required(&self.province, "EPICK_SENDER_PROVINCE")?,
            extra: self.extra.clone().unwrap_or_default(),
            info: self.info.clone().unwrap_or_default(),
        })
    }
}

/// Everything needed to build a create-shipment request besides the order.
#[derive(Debug, Clone, Default)]
pub struct ShippingConfig {
    pub webhook_url: Option<String>,
    pub package: PackageDefaults,
    pub sender: SenderConfig,
    pub addressee_province: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReminderConfig {
    pub cutoff_minutes: i64,
    pub batch_size: usize,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            cutoff_minutes: 10,
            batch_size: 50,
        }
    }
}

impl Config {
    /// Loads `.env` (if any) and reads the process environment.
    pub fn from_env() -> Result<Self> {
        // A missing .env file is the normal case in production.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let site_url = var("SITE_URL")
            .unwrap_or_else(|| DEFAULT_SITE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let mercadopago = MercadoPagoConfig {
            access_token: var("MP_ACCESS_TOKEN").map(SecretString::from),
            base_url: var("MP_BASE_URL")
                .unwrap_or_else(|| DEFAULT_MP_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            currency: var("MP_CURRENCY").unwrap_or_else(|| "ARS".to_string()),
        };

        let epick = EpickConfig {
            base_url: var("EPICK_BASE_URL")
                .unwrap_or_else(|| DEFAULT_EPICK_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            phone: var("EPICK_PHONE"),
            password: var("EPICK_PASSWORD").map(SecretString::from),
        };

        let defaults = PackageDefaults::default();
        let shipping = ShippingConfig {
            webhook_url: var("EPICK_WEBHOOK_URL"),
            package: PackageDefaults {
                long: positive_or(var("EPICK_PKG_LONG"), defaults.long),
                width: positive_or(var("EPICK_PKG_WIDTH"), defaults.width),
                height: positive_or(var("EPICK_PKG_HEIGHT"), defaults.height),
                weight: positive_or(var("EPICK_PKG_WEIGHT"), defaults.weight),
            },
            sender: SenderConfig {
                postal_code: var("EPICK_SENDER_POSTAL_CODE"),
                name: var("EPICK_SENDER_NAME"),
                phone: var("EPICK_SENDER_PHONE"),
                email: var("EPICK_SENDER_EMAIL"),
                street: var("EPICK_SENDER_STREET"),
                number: var("EPICK_SENDER_NUMBER"),
                city: var("EPICK_SENDER_CITY"),
                province: var("EPICK_SENDER_PROVINCE"),
                extra: var("EPICK_SENDER_EXTRA"),
                info: var("EPICK_SENDER_INFO"),
            },
            addressee_province: var("EPICK_ADDRESSEE_PROVINCE"),
        };

        let smtp = match (
            var("SMTP_HOST"),
            var("SMTP_USER"),
            var("SMTP_PASS"),
            var("SMTP_FROM"),
        ) {
            (Some(host), Some(username), Some(password), Some(from)) => Some(SmtpConfig {
                host,
                port: parse_var("SMTP_PORT", var("SMTP_PORT"))?.unwrap_or(587),
                username,
                password: SecretString::from(password),
                from,
            }),
            _ => None,
        };

        let reminder_defaults = ReminderConfig::default();
        let reminders = ReminderConfig {
            cutoff_minutes: parse_var("REMINDER_CUTOFF_MINUTES", var("REMINDER_CUTOFF_MINUTES"))?
                .unwrap_or(reminder_defaults.cutoff_minutes),
            batch_size: parse_var("REMINDER_BATCH_SIZE", var("REMINDER_BATCH_SIZE"))?
                .unwrap_or(reminder_defaults.batch_size),
        };
        if !(0..=MAX_REMINDER_CUTOFF_MINUTES).contains(&reminders.cutoff_minutes)
            || reminders.batch_size == 0
        {
            return Err(EngineError::ConfigError(format!(
                "reminder cutoff must be between 0 and {MAX_REMINDER_CUTOFF_MINUTES} minutes and batch size > 0"
            )));
        }

        Ok(Self {
            site_url,
            mercadopago,
            epick,
            shipping,
            smtp,
            reminders,
        })
    }
}

fn parse_var<T: FromStr>(key: &str, value: Option<String>) -> Result<Option<T>> {
    value
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|_| EngineError::ConfigError(format!("{key}={raw} is not valid")))
        })
        .transpose()
}

/// Package dimensions fall back to their default unless a positive number is given.
fn positive_or(value: Option<String>, default: Decimal) -> Decimal {
    value
        .and_then(|raw| Decimal::from_str(&raw).ok())
        .filter(|v| *v > Decimal::ZERO)
        .unwrap_or(default)
}
