use super::orders::order_not_found;
use crate::domain::actor::Actor;
use crate::domain::ids::OrderId;
use crate::domain::order::{Order, OrderStatus};
use crate::domain::payment::{Payment, PaymentStatus};
use crate::domain::ports::{PaymentGateway, PreferenceItem, PreferenceRequest, StoreRef};
use crate::error::{EngineError, Result};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument};

/// Where to send the buyer to pay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    pub preference_id: String,
    pub init_point: String,
    /// `true` when an earlier preference was handed out again.
    pub reused: bool,
}

fn ensure_payable(order: &Order) -> Result<()> {
    if order.status == OrderStatus::PendingPayment {
        Ok(())
    } else {
        Err(EngineError::InvalidState(format!(
            "order {} is {}, nothing to pay",
            order.id, order.status
        )))
    }
}

/// Opens provider checkout sessions for unpaid orders.
#[derive(Clone)]
pub struct CheckoutService {
    store: StoreRef,
    gateway: Arc<dyn PaymentGateway>,
    site_url: String,
    currency: String,
}

impl CheckoutService {
    pub fn new(
        store: StoreRef,
        gateway: Arc<dyn PaymentGateway>,
        site_url: impl Into<String>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            store,
            gateway,
            site_url: site_url.into(),
            currency: currency.into(),
        }
    }

    /// Returns the order's checkout link, creating a provider preference if needed.
    ///
    /// The provider is called with no transaction open; the local payment row
    /// is only touched once it answered successfully.
    #[instrument(skip(self, actor), fields(actor = %actor.user_id))]
    pub async fn create_preference(
        &self,
        order_id: &OrderId,
        actor: &Actor,
    ) -> Result<CheckoutSession> {
        let provider = self.gateway.provider();

        let request = {
            let mut tx = self.store.begin().await?;
            // Only the buyer pays; admins get no checkout link for other users.
            let order = tx
                .order(order_id)
                .await?
                .filter(|order| order.user_id == actor.user_id)
                .ok_or_else(|| order_not_found(order_id))?;
            ensure_payable(&order)?;

            let reusable = tx
                .payments_for_order(&order.id)
                .await?
                .into_iter()
                .filter(|p| p.provider == provider)
                .find_map(|p| p.preference_id.zip(p.init_point));
            if let Some((preference_id, init_point)) = reusable {
                return Ok(CheckoutSession {
                    preference_id,
                    init_point,
                    reused: true,
                });
            }

            PreferenceRequest {
                order_id: order.id.clone(),
                user_id: order.user_id.clone(),
                items: order
                    .items
                    .iter()
                    .map(|item| PreferenceItem {
                        title: item.name.clone(),
                        quantity: item.quantity,
                        unit_price: item.unit_price.value(),
                        currency_id: self.currency.clone(),
                    })
                    .collect(),
                site_url: self.site_url.clone(),
            }
        };

        let preference = self.gateway.create_preference(&request).await?;

        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        // The order may have been settled while the provider was answering.
        let order = tx
            .order(order_id)
            .await?
            .ok_or_else(|| order_not_found(order_id))?;
        ensure_payable(&order)?;
        // Only an attempt that is still open is reused; settled rows keep
        // their provider status.
        let open = tx
            .payments_for_order(order_id)
            .await?
            .into_iter()
            .filter(|p| p.provider == provider)
            .find(|p| p.status == PaymentStatus::Pending || p.external_id.is_none());
        let mut payment = open.unwrap_or_else(|| Payment::pending(order_id.clone(), provider, now));
        if payment.status != PaymentStatus::Pending {
            payment.pending_at = now;
        }
        payment.status = PaymentStatus::Pending;
        payment.preference_id = Some(preference.id.clone());
        payment.init_point = Some(preference.init_point.clone());
        payment.updated_at = now;
        tx.put_payment(payment).await?;
        tx.commit().await?;

        info!(order_id = %order_id, preference_id = %preference.id, "Checkout preference created");
        Ok(CheckoutSession {
            preference_id: preference.id,
            init_point: preference.init_point,
            reused: false,
        })
    }
}
