use super::inventory;
use super::notifications::Notifier;
use crate::domain::actor::Actor;
use crate::domain::ids::{OrderId, UserId};
use crate::domain::order::{CheckoutLine, Order, ShippingInfo, merge_lines};
use crate::domain::payment::{MERCADOPAGO, Payment};
use crate::domain::ports::{StoreRef, StoreTx};
use crate::domain::shipment::ShipmentRecord;
use crate::error::{EngineError, Result};
use chrono::Utc;
use tracing::{info, instrument};

pub(crate) fn order_not_found(order_id: &OrderId) -> EngineError {
    EngineError::NotFound(format!("Order {order_id}"))
}

/// Loads an order the actor may see. Orders of other customers are reported
/// as missing rather than forbidden.
pub(crate) async fn load_order_for(
    tx: &mut dyn StoreTx,
    order_id: &OrderId,
    actor: &Actor,
) -> Result<Order> {
    tx.order(order_id)
        .await?
        .filter(|order| actor.can_access(&order.user_id))
        .ok_or_else(|| order_not_found(order_id))
}

/// An order together with everything recorded against it.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderDetails {
    pub order: Order,
    /// Newest first.
    pub payments: Vec<Payment>,
    pub shipment: Option<ShipmentRecord>,
}

/// Owns the order state machine: checkout, cancellation and dispatch.
#[derive(Clone)]
pub struct OrderService {
    store: StoreRef,
    notifier: Notifier,
}

impl OrderService {
    pub fn new(store: StoreRef, notifier: Notifier) -> Self {
        Self { store, notifier }
    }

    /// Turns a cart into a `pending_payment` order.
    ///
    /// The order, its item snapshots, the initial payment attempt and every
    /// stock decrement are committed together or not at all.
    #[instrument(skip(self, lines, shipping), fields(user_id = %user_id))]
    pub async fn create_order(
        &self,
        user_id: UserId,
        lines: Vec<CheckoutLine>,
        shipping: ShippingInfo,
    ) -> Result<Order> {
        let shipping = shipping.validated()?;
        let lines = merge_lines(lines)?;
        let now = Utc::now();

        let mut tx = self.store.begin().await?;
        let items = inventory::reserve(tx.as_mut(), &lines).await?;
        let order_number = tx.next_order_number().await?;
        let order = Order::new(order_number, user_id, shipping, items, now)?;
        tx.put_payment(Payment::pending(order.id.clone(), MERCADOPAGO, now))
            .await?;
        tx.put_order(order.clone()).await?;
        tx.commit().await?;

        info!(order_id = %order.id, order_number = order.order_number, total = %order.total, "Order created");
        Ok(order)
    }

    /// Cancels an unpaid order, returning its stock and withdrawing pending payments.
    #[instrument(skip(self, actor), fields(actor = %actor.user_id))]
    pub async fn cancel_order(&self, order_id: &OrderId, actor: &Actor) -> Result<Order> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let mut order = load_order_for(tx.as_mut(), order_id, actor).await?;

        order.cancel(now)?;
        inventory::release(tx.as_mut(), &order.items).await?;
        for mut payment in tx.payments_for_order(&order.id).await? {
            if payment.cancel_if_pending(now) {
                tx.put_payment(payment).await?;
            }
        }
        tx.put_order(order.clone()).await?;
        tx.commit().await?;

        info!(order_id = %order.id, "Order cancelled");
        Ok(order)
    }

    /// Marks a paid order as dispatched and tells the customer.
    #[instrument(skip(self))]
    pub async fn mark_shipped(&self, order_id: &OrderId) -> Result<Order> {
        let mut tx = self.store.begin().await?;
        let mut order = tx
            .order(order_id)
            .await?
            .ok_or_else(|| order_not_found(order_id))?;
        order.ship(Utc::now())?;
        tx.put_order(order.clone()).await?;
        tx.commit().await?;

        info!(order_id = %order.id, "Order shipped");
        self.notifier.order_shipped(&order).await;
        Ok(order)
    }

    pub async fn get_order(&self, order_id: &OrderId, actor: &Actor) -> Result<OrderDetails> {
        let mut tx = self.store.begin().await?;
        let order = load_order_for(tx.as_mut(), order_id, actor).await?;
        let payments = tx.payments_for_order(&order.id).await?;
        let shipment = tx.shipment_for_order(&order.id).await?;
        Ok(OrderDetails {
            order,
            payments,
            shipment,
        })
    }

    /// Every order, oldest first.
    pub async fn orders(&self) -> Result<Vec<Order>> {
        let mut tx = self.store.begin().await?;
        let mut orders = tx.orders().await?;
        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(orders)
    }
}
