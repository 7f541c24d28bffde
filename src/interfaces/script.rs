//! JSON-lines scripts of engine operations, as run by the CLI.
//!
//! Each non-empty line is one object tagged by `op`:
//!
//! ```text
//! {"op":"customer","user":"u1","email":"ana@example.com","name":"Ana"}
//! {"op":"create_order","as":"o1","user":"u1","items":[{"product_id":"A","quantity":2}],"shipping":{...}}
//! {"op":"payment_event","payload":{"id":"mp-1","status":"approved","external_reference":"@o1"}}
//! {"op":"quote","order":"@o1","actor":{"user_id":"u1"}}
//! {"op":"mark_shipped","order":"@o1"}
//! ```
//!
//! A string value of the form `@alias` anywhere in a line is replaced by the
//! id of the order created with that alias. Lines starting with `#` are
//! comments.

use crate::application::engine::FulfillmentEngine;
use crate::domain::actor::Actor;
use crate::domain::cart::CartLineInput;
use crate::domain::ids::{OrderId, UserId};
use crate::domain::order::{CheckoutLine, ShippingInfo};
use crate::domain::ports::Contact;
use crate::domain::shipment::LabelFormat;
use crate::error::{EngineError, Result};
use crate::infrastructure::in_memory::InMemoryDirectory;
use crate::interfaces::webhook;
use chrono::{TimeDelta, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::io::BufRead;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Command {
    Customer {
        user: UserId,
        email: String,
        #[serde(default)]
        name: Option<String>,
    },
    CreateOrder {
        #[serde(rename = "as", default)]
        alias: Option<String>,
        user: UserId,
        items: Vec<CheckoutLine>,
        shipping: ShippingInfo,
    },
    CancelOrder {
        order: OrderId,
        actor: Actor,
    },
    CreatePreference {
        order: OrderId,
        user: UserId,
    },
    PaymentEvent {
        payload: Value,
    },
    /// A provider webhook as received: query parameters and JSON body.
    PaymentNotification {
        #[serde(default)]
        query: HashMap<String, String>,
        #[serde(default)]
        body: Value,
    },
    Quote {
        #[serde(default)]
        order: Option<OrderId>,
        #[serde(default)]
        postal_code: Option<String>,
        actor: Actor,
    },
    CreateShipment {
        order: OrderId,
        actor: Actor,
    },
    ShipmentWebhook {
        payload: Value,
    },
    ConfirmPickup {
        order: OrderId,
        actor: Actor,
    },
    Tracking {
        id: String,
        actor: Actor,
    },
    Labels {
        ids: Vec<String>,
        #[serde(default)]
        format: LabelFormat,
        actor: Actor,
    },
    MarkShipped {
        order: OrderId,
    },
    SyncCart {
        user: UserId,
        items: Vec<CartLineInput>,
    },
    /// Runs the reminder sweep as if `after_minutes` had passed.
    Sweep {
        #[serde(default)]
        after_minutes: i64,
    },
}

/// Outcome counts of a script run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScriptSummary {
    pub executed: usize,
    pub failed: usize,
}

/// Executes scripts against one engine.
///
/// A failing line is logged and counted; the following lines still run.
pub struct ScriptRunner {
    engine: FulfillmentEngine,
    directory: Arc<InMemoryDirectory>,
    aliases: HashMap<String, String>,
}

impl ScriptRunner {
    pub fn new(engine: FulfillmentEngine, directory: Arc<InMemoryDirectory>) -> Self {
        Self {
            engine,
            directory,
            aliases: HashMap::new(),
        }
    }

    pub async fn run<R: BufRead>(&mut self, source: R) -> Result<ScriptSummary> {
        let mut summary = ScriptSummary::default();
        for (index, line) in source.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match self.execute(line).await {
                Ok(()) => summary.executed += 1,
                Err(e) => {
                    error!(line = index + 1, error = %e, "Script operation failed");
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }

    fn substitute(&self, value: &mut Value) {
        match value {
            Value::String(s) => {
                if let Some(id) = s.strip_prefix('@').and_then(|alias| self.aliases.get(alias)) {
                    *s = id.clone();
                }
            }
            Value::Array(items) => items.iter_mut().for_each(|item| self.substitute(item)),
            Value::Object(fields) => fields.values_mut().for_each(|field| self.substitute(field)),
            _ => {}
        }
    }

    async fn execute(&mut self, line: &str) -> Result<()> {
        let mut value: Value = serde_json::from_str(line)?;
        self.substitute(&mut value);
        let command: Command = serde_json::from_value(value)?;
        let engine = &self.engine;

        match command {
            Command::Customer { user, email, name } => {
                self.directory.register(user, Contact { email, name }).await;
            }
            Command::CreateOrder {
                alias,
                user,
                items,
                shipping,
            } => {
                let order = engine.orders.create_order(user, items, shipping).await?;
                if let Some(alias) = alias {
                    self.aliases.insert(alias, order.id.to_string());
                }
            }
            Command::CancelOrder { order, actor } => {
                engine.orders.cancel_order(&order, &actor).await?;
            }
            Command::CreatePreference { order, user } => {
                let session = engine
                    .checkout
                    .create_preference(&order, &Actor::customer(user))
                    .await?;
                info!(init_point = %session.init_point, reused = session.reused, "Checkout ready");
            }
            Command::PaymentEvent { payload } => {
                engine.reconciler.reconcile(&payload).await?;
            }
            Command::PaymentNotification { query, body } => {
                let notification = webhook::payment_notification(
                    query.iter().map(|(k, v)| (k.as_str(), v.as_str())),
                    &body,
                );
                let report = engine.reconciler.handle_notification(&notification).await;
                info!(
                    ignored = report.ignored,
                    reconciled = report.reconciled.len(),
                    failures = report.failures,
                    "Notification acknowledged"
                );
            }
            Command::Quote {
                order,
                postal_code,
                actor,
            } => {
                let quote = engine
                    .shipments
                    .quote(order.as_ref(), postal_code.as_deref(), &actor)
                    .await?;
                info!(%quote, "Shipping quoted");
            }
            Command::CreateShipment { order, actor } => {
                engine.shipments.create_shipment(&order, &actor).await?;
            }
            Command::ShipmentWebhook { payload } => {
                engine.shipments.apply_webhook(&payload).await?;
            }
            Command::ConfirmPickup { order, actor } => {
                engine.shipments.confirm_pickup(&order, &actor).await?;
            }
            Command::Tracking { id, actor } => {
                let outcome = engine.shipments.tracking(&id, &actor).await?;
                info!(status = %outcome.shipment.status, "Tracking retrieved");
            }
            Command::Labels { ids, format, actor } => {
                let label = engine.shipments.labels(&ids, format, &actor).await?;
                info!(content_type = %label.content_type, bytes = label.bytes.len(), "Labels retrieved");
            }
            Command::MarkShipped { order } => {
                engine.orders.mark_shipped(&order).await?;
            }
            Command::SyncCart { user, items } => {
                engine.carts.sync_cart(user, items).await?;
            }
            Command::Sweep { after_minutes } => {
                let now = TimeDelta::try_minutes(after_minutes)
                    .and_then(|offset| Utc::now().checked_add_signed(offset))
                    .ok_or_else(|| {
                        EngineError::ValidationError(format!(
                            "after_minutes {after_minutes} is out of range"
                        ))
                    })?;
                engine.reminders.sweep(now).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::engine::Dependencies;
    use crate::config::Config;
    use crate::domain::money::Money;
    use crate::domain::order::OrderStatus;
    use crate::domain::product::Product;
    use crate::infrastructure::in_memory::InMemoryStore;
    use rust_decimal_macros::dec;

    async fn runner() -> ScriptRunner {
        let config = Config::from_lookup(|_| None).unwrap();
        let directory = Arc::new(InMemoryDirectory::new());
        let deps =
            Dependencies::from_config(&config, Arc::new(InMemoryStore::new()), directory.clone())
                .unwrap();
        let engine = FulfillmentEngine::new(deps, &config);
        engine
            .inventory
            .import(vec![Product::new("A", "Mate", Money::new(dec!(100)), 5)])
            .await
            .unwrap();
        ScriptRunner::new(engine, directory)
    }

    #[tokio::test]
    async fn test_aliases_resolve_to_created_orders() {
        let mut runner = runner().await;
        let script = r#"
# comment
{"op":"create_order","as":"o1","user":"u1","items":[{"product_id":"A","quantity":2}],"shipping":{"name":"Ana","phone":"1","address_line":"x","city":"y","zip":"z"}}
{"op":"payment_notification","query":{"topic":"chargebacks","id":"1"}}
{"op":"payment_event","payload":{"id":"mp-1","status":"rejected","external_reference":"@o1"}}
{"op":"cancel_order","order":"@o1","actor":{"user_id":"u1"}}
"#;
        let summary = runner.run(script.as_bytes()).await.unwrap();

        // The order was already closed by the rejection, so the cancel fails.
        assert_eq!(summary, ScriptSummary { executed: 3, failed: 1 });
        let orders = runner.engine.orders.orders().await.unwrap();
        assert_eq!(orders[0].status, OrderStatus::Cancelled);
        assert_eq!(runner.engine.inventory.products().await.unwrap()[0].stock, 5);
    }

    #[tokio::test]
    async fn test_sweep_offset_out_of_range_fails_the_line() {
        let mut runner = runner().await;
        let script = format!(
            "{{\"op\":\"sweep\",\"after_minutes\":{}}}\n{{\"op\":\"sweep\",\"after_minutes\":30}}\n",
            i64::MAX
        );
        let summary = runner.run(script.as_bytes()).await.unwrap();
        assert_eq!(summary, ScriptSummary { executed: 1, failed: 1 });
    }

    #[tokio::test]
    async fn test_quote_without_sender_zip_fails_the_line() {
        let mut runner = runner().await;
        let script = r#"
{"op":"quote","postal_code":"5000","actor":{"user_id":"u1"}}
{"op":"quote","actor":{"user_id":"u1"}}
"#;
        let summary = runner.run(script.as_bytes()).await.unwrap();
        assert_eq!(summary, ScriptSummary { executed: 0, failed: 2 });
    }

    #[tokio::test]
    async fn test_invalid_lines_are_counted() {
        let mut runner = runner().await;
        let summary = runner
            .run("{\"op\":\"fly\"}\nnot json\n".as_bytes())
            .await
            .unwrap();
        assert_eq!(summary, ScriptSummary { executed: 0, failed: 2 });
    }
}
