use super::orders::{load_order_for, order_not_found};
use crate::config::ShippingConfig;
use crate::domain::actor::Actor;
use crate::domain::ids::OrderId;
use crate::domain::order::{Order, OrderStatus};
use crate::domain::ports::{
    AddressBlock, CustomerDirectory, PackageSpec, PostalCode, QuoteRequest, ShipmentInfo,
    ShipmentRequest, ShippingCarrier, StoreRef, StoreTx,
};
use crate::domain::shipment::{
    Label, LabelFormat, ShipmentCallback, ShipmentRecord, ShipmentStatus, ShipmentWebhookEvent,
    status_label,
};
use crate::error::{EngineError, GatewayError, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct ShipmentOutcome {
    pub shipment: ShipmentRecord,
    /// `true` when the order already had a shipment and no carrier call was made.
    pub reused: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebhookOutcome {
    pub shipment: ShipmentRecord,
    /// Whether the reported status passed the transition guard.
    pub applied: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackingOutcome {
    pub shipment: ShipmentRecord,
    /// `None` for shipments the carrier has not accepted yet.
    pub tracking: Option<Value>,
}

fn reuse_or_conflict(existing: ShipmentRecord) -> Result<ShipmentOutcome> {
    if existing.is_placeholder() {
        Err(EngineError::Conflict(format!(
            "shipment for order {} is being created, retry shortly",
            existing.order_id
        )))
    } else {
        Ok(ShipmentOutcome {
            shipment: existing,
            reused: true,
        })
    }
}

/// Resolves a shipment from an order id, falling back to the carrier id.
async fn find_shipment(tx: &mut dyn StoreTx, id: &str) -> Result<Option<ShipmentRecord>> {
    match tx.shipment_for_order(&OrderId::new(id)).await? {
        Some(shipment) => Ok(Some(shipment)),
        None => tx.shipment_by_external_id(id).await,
    }
}

fn shipment_not_found(id: &str) -> EngineError {
    EngineError::NotFound(format!("Shipment {id}"))
}

/// Declared package value: the order total, or 1 for free orders.
fn declared_value(order: Option<&Order>) -> Decimal {
    order
        .map(|order| order.total.value())
        .filter(|total| *total > Decimal::ZERO)
        .unwrap_or(Decimal::ONE)
}

/// Drives the carrier side of fulfilment.
///
/// Carrier calls never run inside a store transaction. Creation reserves the
/// per-order slot with a placeholder first, so concurrent callers cannot
/// both reach the carrier.
#[derive(Clone)]
pub struct ShipmentService {
    store: StoreRef,
    carrier: Arc<dyn ShippingCarrier>,
    directory: Arc<dyn CustomerDirectory>,
    settings: ShippingConfig,
}

impl ShipmentService {
    pub fn new(
        store: StoreRef,
        carrier: Arc<dyn ShippingCarrier>,
        directory: Arc<dyn CustomerDirectory>,
        settings: ShippingConfig,
    ) -> Self {
        Self {
            store,
            carrier,
            directory,
            settings,
        }
    }

    fn package(&self, order: Option<&Order>) -> PackageSpec {
        let package = self.settings.package;
        PackageSpec {
            long: package.long,
            width: package.width,
            height: package.height,
            weight: package.weight,
            value: declared_value(order),
        }
    }

    fn build_request(
        &self,
        order: &Order,
        email: Option<String>,
    ) -> std::result::Result<ShipmentRequest, GatewayError> {
        let webhook = self
            .settings
            .webhook_url
            .clone()
            .ok_or_else(|| GatewayError::NotConfigured("EPICK_WEBHOOK_URL".to_string()))?;
        let sender = self.settings.sender.block()?;
        let shipping = &order.shipping;

        Ok(ShipmentRequest {
            info: ShipmentInfo { webhook },
            package: self.package(Some(order)),
            addressee: AddressBlock {
                postal_code: shipping.zip.clone(),
                name: shipping.name.clone(),
                phone: shipping.phone.clone(),
                email: email.unwrap_or_else(|| sender.email.clone()),
                street: shipping.address_line.clone(),
                number: shipping.address_line.clone(),
                city: shipping.city.clone(),
                province: self
                    .settings
                    .addressee_province
                    .clone()
                    .unwrap_or_else(|| shipping.city.clone()),
                extra: String::new(),
                info: String::new(),
            },
            sender,
        })
    }

    /// Prices the default package to a postal code.
    ///
    /// The destination is `postal_code` when given, else the shipping zip of
    /// `order_id`, which must be visible to the actor. An order also sets the
    /// declared value.
    #[instrument(skip(self, actor), fields(actor = %actor.user_id))]
    pub async fn quote(
        &self,
        order_id: Option<&OrderId>,
        postal_code: Option<&str>,
        actor: &Actor,
    ) -> Result<Value> {
        let postal_code = postal_code.map(str::trim).filter(|zip| !zip.is_empty());
        let order_id = order_id.filter(|id| !id.as_str().trim().is_empty());
        if order_id.is_none() && postal_code.is_none() {
            return Err(EngineError::ValidationError(
                "an order or a postal code is required".to_string(),
            ));
        }

        let order = match order_id {
            Some(order_id) => {
                let mut tx = self.store.begin().await?;
                Some(load_order_for(tx.as_mut(), order_id, actor).await?)
            }
            None => None,
        };
        let destination = postal_code
            .map(str::to_string)
            .or_else(|| order.as_ref().map(|order| order.shipping.zip.clone()))
            .filter(|zip| !zip.is_empty())
            .ok_or_else(|| EngineError::ValidationError("invalid postal code".to_string()))?;
        let origin = self
            .settings
            .sender
            .postal_code
            .clone()
            .ok_or_else(|| GatewayError::NotConfigured("EPICK_SENDER_POSTAL_CODE".to_string()))?;

        let request = QuoteRequest {
            package: self.package(order.as_ref()),
            sender: PostalCode { postal_code: origin },
            addressee: PostalCode {
                postal_code: destination,
            },
        };
        Ok(self.carrier.quote(&request).await?)
    }

    /// Creates the carrier shipment for a paid order, or returns the existing one.
    #[instrument(skip(self, actor), fields(actor = %actor.user_id))]
    pub async fn create_shipment(&self, order_id: &OrderId, actor: &Actor) -> Result<ShipmentOutcome> {
        let order = {
            let mut tx = self.store.begin().await?;
            let order = load_order_for(tx.as_mut(), order_id, actor).await?;
            if !matches!(order.status, OrderStatus::Paid | OrderStatus::Shipped) {
                return Err(EngineError::InvalidState(format!(
                    "order {} is not paid",
                    order.id
                )));
            }
            if let Some(existing) = tx.shipment_for_order(&order.id).await? {
                return reuse_or_conflict(existing);
            }
            order
        };

        let email = self
            .directory
            .contact(&order.user_id)
            .await?
            .map(|contact| contact.email);
        let request = self.build_request(&order, email)?;

        {
            let mut tx = self.store.begin().await?;
            let placeholder = ShipmentRecord::placeholder(order.id.clone(), Utc::now());
            if !tx.insert_shipment(placeholder).await? {
                let existing = tx
                    .shipment_for_order(&order.id)
                    .await?
                    .ok_or_else(|| shipment_not_found(order.id.as_str()))?;
                return reuse_or_conflict(existing);
            }
            tx.commit().await?;
        }

        let created = match self.carrier.create_shipment(&request).await {
            Ok(response) => self.fill_placeholder(&order.id, &response).await,
            Err(e) => Err(e.into()),
        };
        match created {
            Ok(shipment) => {
                info!(order_id = %order.id, external_id = ?shipment.external_id, "Shipment created");
                Ok(ShipmentOutcome {
                    shipment,
                    reused: false,
                })
            }
            Err(e) => {
                error!(order_id = %order.id, error = %e, "Shipment creation failed, releasing slot");
                let mut tx = self.store.begin().await?;
                tx.delete_shipment(&order.id).await?;
                tx.commit().await?;
                Err(e)
            }
        }
    }

    async fn fill_placeholder(&self, order_id: &OrderId, response: &Value) -> Result<ShipmentRecord> {
        let mut tx = self.store.begin().await?;
        let mut shipment = tx
            .shipment_for_order(order_id)
            .await?
            .ok_or_else(|| shipment_not_found(order_id.as_str()))?;
        shipment
            .fill_from_carrier(response, Utc::now())
            .map_err(|_| {
                GatewayError::InvalidResponse("carrier response has no shipment id".to_string())
            })?;
        tx.put_shipment(shipment.clone()).await?;
        tx.commit().await?;
        Ok(shipment)
    }

    /// Applies a carrier status callback.
    ///
    /// Every callback for a known shipment is logged, even when its status
    /// is rejected by the transition guard.
    #[instrument(skip(self, raw))]
    pub async fn apply_webhook(&self, raw: &Value) -> Result<WebhookOutcome> {
        let callback = ShipmentCallback::from_raw(raw)?;
        let now = Utc::now();

        let mut tx = self.store.begin().await?;
        let mut shipment = tx
            .shipment_by_external_id(&callback.external_id)
            .await?
            .filter(|s| s.sender_code.as_deref() == Some(callback.sender_code.as_str()))
            .ok_or_else(|| shipment_not_found(&callback.external_id))?;

        tx.append_shipment_event(ShipmentWebhookEvent::new(
            shipment.id.clone(),
            callback.raw.clone(),
            now,
        ))
        .await?;

        let from = shipment.status;
        let applied = shipment.advance(callback.status, now);
        if applied {
            shipment.last_payload = Some(callback.raw);
            tx.put_shipment(shipment.clone()).await?;
        }
        tx.commit().await?;

        if applied {
            info!(external_id = %callback.external_id, %from, to = %shipment.status, "Shipment status applied");
        } else {
            warn!(external_id = %callback.external_id, %from, to = %callback.status, "Shipment transition rejected");
        }
        Ok(WebhookOutcome { shipment, applied })
    }

    /// Asks the carrier to collect a shipment that is paid for.
    #[instrument(skip(self, actor), fields(actor = %actor.user_id))]
    pub async fn confirm_pickup(&self, order_id: &OrderId, actor: &Actor) -> Result<ShipmentRecord> {
        let (external_id, sender_code) = {
            let mut tx = self.store.begin().await?;
            let shipment = tx
                .shipment_for_order(order_id)
                .await?
                .ok_or_else(|| shipment_not_found(order_id.as_str()))?;
            let order = tx
                .order(order_id)
                .await?
                .ok_or_else(|| order_not_found(order_id))?;
            if !actor.can_access(&order.user_id) {
                return Err(EngineError::Forbidden);
            }
            if shipment.status != ShipmentStatus::Payed {
                return Err(EngineError::InvalidState(format!(
                    "shipment is {}, only PAYED shipments can be confirmed",
                    shipment.status
                )));
            }
            match (shipment.external_id, shipment.sender_code) {
                (Some(external_id), Some(sender_code)) => (external_id, sender_code),
                _ => {
                    return Err(EngineError::InvalidState(
                        "shipment has no carrier reference".to_string(),
                    ));
                }
            }
        };

        let response = self.carrier.confirm_pickup(&external_id, &sender_code).await?;
        let status = ShipmentStatus::normalize(status_label(&response).or(Some("CONFIRMED")));

        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let mut shipment = tx
            .shipment_for_order(order_id)
            .await?
            .ok_or_else(|| shipment_not_found(order_id.as_str()))?;
        if !shipment.advance(status, now) {
            warn!(%external_id, from = %shipment.status, to = %status, "Pickup status rejected");
        }
        shipment.last_payload = Some(response.to_string());
        shipment.updated_at = now;
        tx.put_shipment(shipment.clone()).await?;
        tx.commit().await?;

        info!(%external_id, status = %shipment.status, "Pickup confirmed");
        Ok(shipment)
    }

    /// Queries carrier tracking for an order id or carrier shipment id.
    #[instrument(skip(self, actor), fields(actor = %actor.user_id))]
    pub async fn tracking(&self, id: &str, actor: &Actor) -> Result<TrackingOutcome> {
        let shipment = {
            let mut tx = self.store.begin().await?;
            let shipment = find_shipment(tx.as_mut(), id)
                .await?
                .ok_or_else(|| shipment_not_found(id))?;
            let visible = tx
                .order(&shipment.order_id)
                .await?
                .is_some_and(|order| actor.can_access(&order.user_id));
            if !visible {
                return Err(shipment_not_found(id));
            }
            shipment
        };

        let external_id = match shipment.external_id.clone() {
            Some(external_id) if shipment.status != ShipmentStatus::Pending => external_id,
            _ => {
                return Ok(TrackingOutcome {
                    shipment,
                    tracking: None,
                });
            }
        };

        let response = self.carrier.tracking(&external_id).await?;

        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let mut shipment = tx
            .shipment_for_order(&shipment.order_id)
            .await?
            .ok_or_else(|| shipment_not_found(id))?;
        if let Some(label) = status_label(&response) {
            let next = ShipmentStatus::normalize(Some(label));
            if !shipment.advance(next, now) {
                warn!(%external_id, from = %shipment.status, to = %next, "Tracking status rejected");
            }
        }
        shipment.last_tracking = Some(response.to_string());
        shipment.updated_at = now;
        tx.put_shipment(shipment.clone()).await?;
        tx.commit().await?;

        Ok(TrackingOutcome {
            shipment,
            tracking: Some(response),
        })
    }

    /// Downloads printable labels. Admin only.
    ///
    /// `ids` may mix order ids and carrier ids. Every shipment found must be
    /// `PAYED` or `CONFIRMED`.
    #[instrument(skip(self, actor), fields(actor = %actor.user_id))]
    pub async fn labels(&self, ids: &[String], format: LabelFormat, actor: &Actor) -> Result<Label> {
        if !actor.is_admin() {
            return Err(EngineError::Forbidden);
        }
        let ids: Vec<&str> = ids
            .iter()
            .map(|id| id.trim())
            .filter(|id| !id.is_empty())
            .collect();
        if ids.is_empty() {
            return Err(EngineError::ValidationError("ids are required".to_string()));
        }

        let mut shipments: Vec<ShipmentRecord> = Vec::new();
        {
            let mut tx = self.store.begin().await?;
            for id in ids {
                if let Some(shipment) = find_shipment(tx.as_mut(), id).await?
                    && !shipments.iter().any(|s| s.id == shipment.id)
                {
                    shipments.push(shipment);
                }
            }
        }
        if shipments.is_empty() {
            return Err(EngineError::NotFound("Shipments".to_string()));
        }

        let mut external_ids = Vec::with_capacity(shipments.len());
        for shipment in &shipments {
            match &shipment.external_id {
                Some(external_id)
                    if matches!(
                        shipment.status,
                        ShipmentStatus::Payed | ShipmentStatus::Confirmed
                    ) =>
                {
                    external_ids.push(external_id.clone())
                }
                _ => {
                    return Err(EngineError::InvalidState(format!(
                        "labels are only available for PAYED or CONFIRMED shipments (order {} is {})",
                        shipment.order_id, shipment.status
                    )));
                }
            }
        }

        Ok(self.carrier.labels(&external_ids, format).await?)
    }
}
