//! Payment reconciliation.
//!
//! Provider notifications arrive at least once, in any order, and possibly
//! duplicated. Every event is applied inside one store transaction keyed by
//! (provider, external payment id), so replays converge on the same state:
//!
//! - `approved` moves a `pending_payment` order to `paid`, exactly once;
//! - `rejected`, `cancelled` and `refunded` close a `pending_payment` order and
//!   return its stock;
//! - nothing ever moves an order out of `paid` through this path.
//!
//! Side effects that must not roll back business state (the confirmation
//! mail) are returned from the transactional step as [`PostCommit`] actions
//! and executed after the commit.

use super::inventory;
use super::notifications::Notifier;
use crate::domain::ids::{OrderId, PaymentId};
use crate::domain::order::{Order, OrderStatus};
use crate::domain::payment::{Payment, PaymentEvent, PaymentNotification, PaymentStatus, scalar_string};
use crate::domain::ports::{PaymentGateway, StoreRef};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// What a reconciled event did to its order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderChange {
    Unchanged,
    Paid,
    /// Closed unpaid, with `cancelled` or `refunded`.
    Closed(OrderStatus),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub payment_id: PaymentId,
    pub external_id: String,
    pub status: PaymentStatus,
    /// `None` when the payment landed in the unresolved bucket.
    pub order_id: Option<OrderId>,
    pub order_status: Option<OrderStatus>,
    pub change: OrderChange,
}

/// Work to run once the reconciling transaction has committed.
#[derive(Debug, Clone, PartialEq)]
pub enum PostCommit {
    SendPaymentConfirmed(Order),
}

/// Summary of one inbound notification. The caller always acknowledges it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationReport {
    pub ignored: bool,
    pub reconciled: Vec<Reconciliation>,
    pub failures: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Topic {
    Payment,
    MerchantOrder,
}

impl Topic {
    /// A notification without topic is treated as a payment.
    fn parse(topic: Option<&str>) -> Option<Self> {
        match topic.map(str::trim) {
            None | Some("") | Some("payment") => Some(Self::Payment),
            Some("merchant_order") => Some(Self::MerchantOrder),
            Some(_) => None,
        }
    }
}

#[derive(Clone)]
pub struct PaymentReconciler {
    store: StoreRef,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Notifier,
}

impl PaymentReconciler {
    pub fn new(store: StoreRef, gateway: Arc<dyn PaymentGateway>, notifier: Notifier) -> Self {
        Self {
            store,
            gateway,
            notifier,
        }
    }

    /// Applies one raw provider payment object.
    #[instrument(skip(self, raw), fields(external_id = tracing::field::Empty))]
    pub async fn reconcile(&self, raw: &Value) -> Result<Reconciliation> {
        let event = PaymentEvent::from_raw(raw)?;
        tracing::Span::current().record("external_id", event.external_id.as_str());

        let (reconciliation, actions) = self.apply(&event, Utc::now()).await?;
        for action in actions {
            self.run(action).await;
        }
        Ok(reconciliation)
    }

    async fn apply(
        &self,
        event: &PaymentEvent,
        now: DateTime<Utc>,
    ) -> Result<(Reconciliation, Vec<PostCommit>)> {
        let provider = self.gateway.provider();
        let mut tx = self.store.begin().await?;

        let keyed = tx
            .payment_by_external_id(provider, &event.external_id)
            .await?;
        // A row that already knows its order keeps it, whatever the event says.
        let order_ref = keyed
            .as_ref()
            .and_then(|p| p.order_id.clone())
            .or_else(|| event.order_ref.clone());
        let mut order = match &order_ref {
            Some(id) => tx.order(id).await?,
            None => None,
        };
        if let (Some(id), None) = (&order_ref, &order) {
            warn!(order_id = %id, "Payment references an unknown order");
        }
        let order_id = order.as_ref().map(|o| o.id.clone());

        let mut payment = match keyed {
            Some(payment) => payment,
            None => {
                let claimable = match &order_id {
                    Some(id) => tx
                        .payments_for_order(id)
                        .await?
                        .into_iter()
                        .find(|p| p.provider == provider && p.external_id.is_none()),
                    None => None,
                };
                match claimable {
                    Some(payment) => payment,
                    None => Payment::from_event(event, order_id.clone(), provider, now),
                }
            }
        };
        payment.apply_event(event, now);
        if payment.order_id.is_none() {
            payment.order_id = order_id.clone();
        }
        let payment_id = payment.id.clone();
        tx.put_payment(payment).await?;

        let mut actions = Vec::new();
        let mut change = OrderChange::Unchanged;
        if let Some(order) = order.as_mut() {
            if event.status == PaymentStatus::Approved {
                if order.mark_paid(now) {
                    change = OrderChange::Paid;
                    actions.push(PostCommit::SendPaymentConfirmed(order.clone()));
                } else if order.status != OrderStatus::Paid {
                    warn!(order_id = %order.id, status = %order.status, "Approved payment for a closed order");
                }
            } else if let Some(outcome) = event.status.closing_outcome()
                && order.close_unpaid(outcome, now)
            {
                inventory::release(tx.as_mut(), &order.items).await?;
                change = OrderChange::Closed(outcome);
            }

            if change != OrderChange::Unchanged {
                tx.put_order(order.clone()).await?;
            }
        }
        tx.commit().await?;

        match (&order, change) {
            (Some(order), OrderChange::Unchanged) => {
                info!(order_id = %order.id, payment_status = %event.status, "Payment recorded")
            }
            (Some(order), _) => {
                info!(order_id = %order.id, status = %order.status, "Order updated from payment")
            }
            (None, _) => warn!(payment_status = %event.status, "Payment stored without order"),
        }

        Ok((
            Reconciliation {
                payment_id,
                external_id: event.external_id.clone(),
                status: event.status,
                order_id,
                order_status: order.map(|o| o.status),
                change,
            },
            actions,
        ))
    }

    async fn run(&self, action: PostCommit) {
        match action {
            PostCommit::SendPaymentConfirmed(order) => {
                self.notifier.payment_confirmed(&order).await;
            }
        }
    }

    /// Entry point for provider webhooks.
    ///
    /// Never fails: unsupported topics are ignored and processing errors are
    /// logged, so the provider always gets its acknowledgement.
    #[instrument(skip(self))]
    pub async fn handle_notification(&self, notification: &PaymentNotification) -> NotificationReport {
        let topic = Topic::parse(notification.topic.as_deref());
        let (Some(topic), Some(id)) = (topic, notification.id.as_deref()) else {
            return NotificationReport {
                ignored: true,
                ..NotificationReport::default()
            };
        };

        let payloads = match self.payloads(topic, id).await {
            Ok(payloads) => payloads,
            Err(e) => {
                error!(error = %e, "Failed to fetch notification payload");
                return NotificationReport {
                    failures: 1,
                    ..NotificationReport::default()
                };
            }
        };

        let mut report = NotificationReport::default();
        for payload in payloads {
            let payload = match payload {
                Ok(payload) => payload,
                Err(e) => {
                    error!(error = %e, "Failed to fetch payment");
                    report.failures += 1;
                    continue;
                }
            };
            match self.reconcile(&payload).await {
                Ok(reconciliation) => report.reconciled.push(reconciliation),
                Err(e) => {
                    error!(error = %e, "Payment webhook processing failed");
                    report.failures += 1;
                }
            }
        }
        report
    }

    /// Resolves a notification into the payment objects to reconcile.
    ///
    /// Merchant orders list their payments; those reported with a status are
    /// used inline, the rest are fetched one by one.
    async fn payloads(&self, topic: Topic, id: &str) -> Result<Vec<Result<Value>>> {
        match topic {
            Topic::Payment => Ok(vec![Ok(self.gateway.fetch_payment(id).await?)]),
            Topic::MerchantOrder => {
                let merchant_order = self.gateway.fetch_merchant_order(id).await?;
                let external_reference = merchant_order.get("external_reference").cloned();
                let entries = merchant_order
                    .get("payments")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();

                let mut payloads = Vec::with_capacity(entries.len());
                for entry in entries {
                    let Some(payment_id) = scalar_string(entry.get("id")) else {
                        continue;
                    };
                    let status = entry.get("status").and_then(Value::as_str);
                    let payload = match status.filter(|s| !s.is_empty()) {
                        Some(status) => Ok(json!({
                            "id": payment_id,
                            "status": status,
                            "external_reference": external_reference,
                            "preference_id": entry.get("preference_id"),
                        })),
                        None => self
                            .gateway
                            .fetch_payment(&payment_id)
                            .await
                            .map_err(Into::into),
                    };
                    payloads.push(payload);
                }
                Ok(payloads)
            }
        }
    }
}
