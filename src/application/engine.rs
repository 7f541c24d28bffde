use super::carts::CartService;
use super::inventory::Inventory;
use super::notifications::Notifier;
use super::orders::OrderService;
use super::payments::CheckoutService;
use super::reconciliation::PaymentReconciler;
use super::reminders::ReminderScheduler;
use super::shipments::ShipmentService;
use crate::config::Config;
use crate::domain::ports::{CustomerDirectory, Mailer, PaymentGateway, ShippingCarrier, StoreRef};
use crate::error::{EngineError, Result};
use crate::infrastructure::epick::EpickClient;
use crate::infrastructure::mercadopago::MercadoPagoClient;
use crate::infrastructure::smtp::{LogMailer, SmtpMailer};
use std::sync::Arc;
use tracing::info;

/// The ports an engine is assembled from.
#[derive(Clone)]
pub struct Dependencies {
    pub store: StoreRef,
    pub gateway: Arc<dyn PaymentGateway>,
    pub carrier: Arc<dyn ShippingCarrier>,
    pub mailer: Arc<dyn Mailer>,
    pub directory: Arc<dyn CustomerDirectory>,
}

impl Dependencies {
    /// Wires the production adapters around `store` and `directory`.
    ///
    /// Missing provider credentials are not an error here; the adapters
    /// report them when first used. Without SMTP settings mail is only logged.
    pub fn from_config(
        config: &Config,
        store: StoreRef,
        directory: Arc<dyn CustomerDirectory>,
    ) -> Result<Self> {
        let mailer: Arc<dyn Mailer> = match &config.smtp {
            Some(smtp) => Arc::new(SmtpMailer::new(smtp).map_err(|e| {
                EngineError::ConfigError(format!("invalid SMTP settings: {e}"))
            })?),
            None => {
                info!("SMTP is not configured, emails will only be logged");
                Arc::new(LogMailer)
            }
        };
        Ok(Self {
            store,
            gateway: Arc::new(MercadoPagoClient::new(&config.mercadopago)?),
            carrier: Arc::new(EpickClient::new(
                &config.epick,
                EpickClient::login_cache(&config.epick)?,
            )?),
            mailer,
            directory,
        })
    }
}

/// Entry point bundling every service over one store.
///
/// Services are cheap to clone and share the same ports, so callers can
/// hand them to concurrent tasks.
#[derive(Clone)]
pub struct FulfillmentEngine {
    pub inventory: Inventory,
    pub orders: OrderService,
    pub checkout: CheckoutService,
    pub reconciler: PaymentReconciler,
    pub shipments: ShipmentService,
    pub carts: CartService,
    pub reminders: ReminderScheduler,
}

impl FulfillmentEngine {
    pub fn new(deps: Dependencies, config: &Config) -> Self {
        let notifier = Notifier::new(deps.mailer, deps.directory.clone(), config.site_url.clone());
        Self {
            inventory: Inventory::new(deps.store.clone()),
            orders: OrderService::new(deps.store.clone(), notifier.clone()),
            checkout: CheckoutService::new(
                deps.store.clone(),
                deps.gateway.clone(),
                config.site_url.clone(),
                config.mercadopago.currency.clone(),
            ),
            reconciler: PaymentReconciler::new(deps.store.clone(), deps.gateway, notifier.clone()),
            shipments: ShipmentService::new(
                deps.store.clone(),
                deps.carrier,
                deps.directory,
                config.shipping.clone(),
            ),
            carts: CartService::new(deps.store.clone()),
            reminders: ReminderScheduler::new(deps.store, notifier, config.reminders),
        }
    }
}
