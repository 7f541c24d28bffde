//! Periodic reminder sweep for abandoned carts and stale pending payments.
//!
//! A candidate is mailed first and marked afterwards, in its own
//! transaction, and only if it did not change in between. A failed delivery
//! leaves the candidate unmarked for the next sweep.

use super::notifications::{Delivery, Notifier};
use crate::config::ReminderConfig;
use crate::domain::cart::CartSnapshot;
use crate::domain::ids::PaymentId;
use crate::domain::order::{Order, OrderStatus};
use crate::domain::payment::{Payment, PaymentStatus};
use crate::domain::ports::StoreRef;
use crate::error::{EngineError, Result};
use chrono::{DateTime, TimeDelta, Utc};
use tracing::{info, instrument, warn};

/// Counts for one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub cart_reminders: usize,
    pub payment_reminders: usize,
    /// Marked without a mail: no contact on file, or a cart that cannot be
    /// read or priced.
    pub skipped: usize,
    /// Left unmarked after a failed delivery.
    pub failed: usize,
}

#[derive(Clone)]
pub struct ReminderScheduler {
    store: StoreRef,
    notifier: Notifier,
    config: ReminderConfig,
}

impl ReminderScheduler {
    pub fn new(store: StoreRef, notifier: Notifier, config: ReminderConfig) -> Self {
        Self {
            store,
            notifier,
            config,
        }
    }

    /// Runs one sweep as of `now`.
    #[instrument(skip(self))]
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let cutoff = TimeDelta::try_minutes(self.config.cutoff_minutes)
            .and_then(|inactivity| now.checked_sub_signed(inactivity))
            .ok_or_else(|| {
                EngineError::ConfigError(format!(
                    "reminder cutoff of {} minutes is out of range",
                    self.config.cutoff_minutes
                ))
            })?;
        let (carts, payments) = self.due(cutoff).await?;

        let mut report = SweepReport::default();
        for cart in carts {
            self.remind_cart(cart, now, &mut report).await?;
        }
        for (payment, order) in payments {
            self.remind_payment(payment, order, now, &mut report).await?;
        }

        info!(
            carts = report.cart_reminders,
            payments = report.payment_reminders,
            skipped = report.skipped,
            failed = report.failed,
            "Reminder sweep finished"
        );
        Ok(report)
    }

    async fn due(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<(Vec<CartSnapshot>, Vec<(Payment, Order)>)> {
        let mut tx = self.store.begin().await?;

        let mut carts: Vec<_> = tx
            .carts()
            .await?
            .into_iter()
            .filter(|cart| cart.needs_reminder(cutoff))
            .collect();
        carts.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| a.user_id.cmp(&b.user_id)));
        carts.truncate(self.config.batch_size);

        let mut candidates: Vec<_> = tx
            .payments()
            .await?
            .into_iter()
            .filter(|payment| payment.needs_reminder(cutoff))
            .collect();
        candidates.sort_by(|a, b| a.pending_at.cmp(&b.pending_at).then_with(|| a.id.cmp(&b.id)));

        let mut payments = Vec::new();
        for payment in candidates {
            if payments.len() == self.config.batch_size {
                break;
            }
            let Some(order_id) = payment.order_id.as_ref() else {
                continue;
            };
            if let Some(order) = tx.order(order_id).await?
                && order.status == OrderStatus::PendingPayment
            {
                payments.push((payment, order));
            }
        }
        Ok((carts, payments))
    }

    async fn remind_cart(
        &self,
        cart: CartSnapshot,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> Result<()> {
        let delivery = match cart.priced() {
            Ok(priced) => self.notifier.abandoned_cart(&cart.user_id, &priced).await,
            Err(e) => {
                warn!(user_id = %cart.user_id, error = %e, "Unreadable cart snapshot, marking without mail");
                Delivery::NoRecipient
            }
        };
        match delivery {
            Delivery::Sent => report.cart_reminders += 1,
            Delivery::NoRecipient => report.skipped += 1,
            Delivery::Failed => {
                report.failed += 1;
                return Ok(());
            }
        }

        let mut tx = self.store.begin().await?;
        // A cart updated during delivery is a new cart and keeps its reminder.
        if let Some(mut current) = tx.cart(&cart.user_id).await?
            && current.updated_at == cart.updated_at
            && current.reminder_sent_at.is_none()
        {
            current.reminder_sent_at = Some(now);
            tx.put_cart(current).await?;
            tx.commit().await?;
        }
        Ok(())
    }

    async fn remind_payment(
        &self,
        payment: Payment,
        order: Order,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> Result<()> {
        match self.notifier.pending_payment(&order).await {
            Delivery::Sent => report.payment_reminders += 1,
            Delivery::NoRecipient => report.skipped += 1,
            Delivery::Failed => {
                report.failed += 1;
                return Ok(());
            }
        }
        self.mark_payment(&payment.id, now).await
    }

    async fn mark_payment(&self, payment_id: &PaymentId, now: DateTime<Utc>) -> Result<()> {
        let mut tx = self.store.begin().await?;
        if let Some(mut current) = tx.payment(payment_id).await?
            && current.status == PaymentStatus::Pending
            && current.pending_reminder_sent_at.is_none()
        {
            current.pending_reminder_sent_at = Some(now);
            current.updated_at = now;
            tx.put_payment(current).await?;
            tx.commit().await?;
        }
        Ok(())
    }
}
