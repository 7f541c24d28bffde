use super::templates::{self, Rendered};
use crate::domain::cart::PricedCart;
use crate::domain::ids::UserId;
use crate::domain::order::Order;
use crate::domain::ports::{CustomerDirectory, Mailer, OutgoingMail};
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// The directory has no email for the user; nothing was attempted.
    NoRecipient,
    Failed,
}

/// Renders and delivers customer emails.
///
/// Delivery is best-effort: failures are logged and reported through
/// [`Delivery`], never as errors, so business state is never rolled back
/// because of mail.
#[derive(Clone)]
pub struct Notifier {
    mailer: Arc<dyn Mailer>,
    directory: Arc<dyn CustomerDirectory>,
    site_url: String,
}

impl Notifier {
    pub fn new(
        mailer: Arc<dyn Mailer>,
        directory: Arc<dyn CustomerDirectory>,
        site_url: impl Into<String>,
    ) -> Self {
        Self {
            mailer,
            directory,
            site_url: site_url.into(),
        }
    }

    pub async fn payment_confirmed(&self, order: &Order) -> Delivery {
        self.deliver(&order.user_id, |name| {
            templates::payment_confirmed(name, order)
        })
        .await
    }

    pub async fn order_shipped(&self, order: &Order) -> Delivery {
        self.deliver(&order.user_id, |name| templates::order_shipped(name, order))
            .await
    }

    pub async fn abandoned_cart(&self, user_id: &UserId, cart: &PricedCart) -> Delivery {
        self.deliver(user_id, |name| {
            templates::abandoned_cart(name, cart, &self.site_url)
        })
        .await
    }

    pub async fn pending_payment(&self, order: &Order) -> Delivery {
        self.deliver(&order.user_id, |name| {
            templates::pending_payment(name, order, &self.site_url)
        })
        .await
    }

    async fn deliver<F>(&self, user_id: &UserId, render: F) -> Delivery
    where
        F: FnOnce(&str) -> Rendered,
    {
        let contact = match self.directory.contact(user_id).await {
            Ok(Some(contact)) => contact,
            Ok(None) => {
                debug!(%user_id, "No contact for user, skipping mail");
                return Delivery::NoRecipient;
            }
            Err(e) => {
                warn!(%user_id, error = %e, "Customer directory lookup failed");
                return Delivery::Failed;
            }
        };

        let Rendered { subject, html } = render(contact.display_name());
        let mail = OutgoingMail {
            to: contact.email.clone(),
            subject,
            html,
        };
        match self.mailer.send(mail).await {
            Ok(()) => Delivery::Sent,
            Err(e) => {
                warn!(%user_id, error = %e, "Mail delivery failed");
                Delivery::Failed
            }
        }
    }
}
