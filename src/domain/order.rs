use super::ids::{OrderId, ProductId, UserId};
use super::money::Money;
use super::product::Product;
use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    PendingPayment,
    Paid,
    Shipped,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingPayment => "pending_payment",
            Self::Paid => "paid",
            Self::Shipped => "shipped",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Shipped | Self::Cancelled | Self::Refunded)
    }

    /// The order lifecycle:
    /// `pending_payment -> paid -> shipped`, `pending_payment -> cancelled`,
    /// `pending_payment | paid -> refunded`.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::PendingPayment, Self::Paid)
                | (Self::Paid, Self::Shipped)
                | (Self::PendingPayment, Self::Cancelled)
                | (Self::PendingPayment | Self::Paid, Self::Refunded)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shipping address captured at checkout.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Default)]
pub struct ShippingInfo {
    pub name: String,
    pub phone: String,
    pub address_line: String,
    pub city: String,
    pub zip: String,
}

impl ShippingInfo {
    /// Trims every field and rejects the address if any of them is empty.
    pub fn validated(self) -> Result<Self> {
        let info = Self {
            name: self.name.trim().to_string(),
            phone: self.phone.trim().to_string(),
            address_line: self.address_line.trim().to_string(),
            city: self.city.trim().to_string(),
            zip: self.zip.trim().to_string(),
        };
        let complete = [
            &info.name,
            &info.phone,
            &info.address_line,
            &info.city,
            &info.zip,
        ]
        .iter()
        .all(|field| !field.is_empty());

        if complete {
            Ok(info)
        } else {
            Err(EngineError::ValidationError(
                "All shipping fields are required".to_string(),
            ))
        }
    }
}

/// A requested checkout line, before it is priced against the catalog.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct CheckoutLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// Validates checkout lines and merges duplicates by summing their quantity.
///
/// The first occurrence of a product decides its position in the order.
pub fn merge_lines(lines: Vec<CheckoutLine>) -> Result<Vec<CheckoutLine>> {
    if lines.is_empty() {
        return Err(EngineError::ValidationError("Cart is empty".to_string()));
    }

    let mut merged: Vec<CheckoutLine> = Vec::with_capacity(lines.len());
    for line in lines {
        if line.quantity == 0 || line.product_id.as_str().trim().is_empty() {
            return Err(EngineError::ValidationError(
                "Invalid checkout line".to_string(),
            ));
        }
        match merged.iter_mut().find(|m| m.product_id == line.product_id) {
            Some(existing) => {
                existing.quantity = existing.quantity.checked_add(line.quantity).ok_or_else(|| {
                    EngineError::ValidationError("Quantity out of range".to_string())
                })?
            }
            None => merged.push(line),
        }
    }
    Ok(merged)
}

/// A priced order line. Snapshots are immutable once the order exists.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub name: String,
    pub unit_price: Money,
    pub quantity: u32,
    pub subtotal: Money,
}

impl OrderItem {
    /// Prices `quantity` units at the product's current price.
    pub fn snapshot(product: &Product, quantity: u32) -> Result<Self> {
        Ok(Self {
            product_id: product.id.clone(),
            name: product.name.clone(),
            unit_price: product.price,
            quantity,
            subtotal: product.price.times(quantity)?,
        })
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Order {
    pub id: OrderId,
    /// Human-readable sequence number, shown to customers as `#N`.
    #[serde(default)]
    pub order_number: u64,
    pub user_id: UserId,
    pub status: OrderStatus,
    pub total: Money,
    pub shipping: ShippingInfo,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub shipped_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn new(
        order_number: u64,
        user_id: UserId,
        shipping: ShippingInfo,
        items: Vec<OrderItem>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let total = Money::total(items.iter().map(|item| item.subtotal))?;
        Ok(Self {
            id: OrderId::generate(),
            order_number,
            user_id,
            status: OrderStatus::PendingPayment,
            total,
            shipping,
            items,
            created_at: now,
            updated_at: now,
            shipped_at: None,
        })
    }

    /// The reference customers see: `#N`, or the id for unnumbered orders.
    pub fn reference(&self) -> String {
        if self.order_number > 0 {
            format!("#{}", self.order_number)
        } else {
            self.id.to_string()
        }
    }

    fn transition(&mut self, next: OrderStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::InvalidState(format!(
                "order {} is {}, cannot become {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Customer or admin cancellation. Only unpaid orders can be cancelled.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(OrderStatus::Cancelled, now)
    }

    /// Flips an unpaid order to `paid`.
    ///
    /// Returns `true` only for the call that performed the transition.
    pub fn mark_paid(&mut self, now: DateTime<Utc>) -> bool {
        self.status == OrderStatus::PendingPayment
            && self.transition(OrderStatus::Paid, now).is_ok()
    }

    /// Closes an order whose payment will never arrive.
    ///
    /// Only applies while the order is still `pending_payment`; returns whether
    /// the order changed so the caller knows to release its stock.
    pub fn close_unpaid(&mut self, outcome: OrderStatus, now: DateTime<Utc>) -> bool {
        self.status == OrderStatus::PendingPayment && self.transition(outcome, now).is_ok()
    }

    pub fn ship(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status != OrderStatus::Paid {
            return Err(EngineError::InvalidState(format!(
                "order {} is not paid",
                self.id
            )));
        }
        self.transition(OrderStatus::Shipped, now)?;
        self.shipped_at = Some(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn shipping() -> ShippingInfo {
        ShippingInfo {
            name: " Ana ".into(),
            phone: "1155550000".into(),
            address_line: "Av. Siempreviva 742".into(),
            city: "Rosario".into(),
            zip: "2000".into(),
        }
    }

    fn order() -> Order {
        let product = Product::new("A", "Mate", Money::new(dec!(100)), 5);
        let items = vec![OrderItem::snapshot(&product, 2).unwrap()];
        Order::new(7, UserId::new("u1"), shipping(), items, Utc::now()).unwrap()
    }

    #[test]
    fn test_shipping_validation_trims() {
        let info = shipping().validated().unwrap();
        assert_eq!(info.name, "Ana");
    }

    #[test]
    fn test_shipping_validation_rejects_blank_field() {
        let mut info = shipping();
        info.city = "   ".into();
        assert!(matches!(
            info.validated(),
            Err(EngineError::ValidationError(_))
        ));
    }

    #[test]
    fn test_merge_lines_sums_duplicates() {
        let merged = merge_lines(vec![
            CheckoutLine { product_id: "A".into(), quantity: 1 },
            CheckoutLine { product_id: "B".into(), quantity: 2 },
            CheckoutLine { product_id: "A".into(), quantity: 3 },
        ])
        .unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].product_id, ProductId::new("A"));
        assert_eq!(merged[0].quantity, 4);
        assert_eq!(merged[1].quantity, 2);
    }

    #[test]
    fn test_merge_lines_rejects_empty_and_zero() {
        assert!(merge_lines(vec![]).is_err());
        assert!(merge_lines(vec![CheckoutLine { product_id: "A".into(), quantity: 0 }]).is_err());
    }

    #[test]
    fn test_total_is_sum_of_subtotals() {
        let order = order();
        assert_eq!(order.total, Money::new(dec!(200)));
        assert_eq!(order.items[0].subtotal, Money::new(dec!(200)));
        assert_eq!(order.status, OrderStatus::PendingPayment);
    }

    #[test]
    fn test_overflowing_total_is_rejected() {
        let product = Product::new("Z", "Gold", Money::new(Decimal::MAX), 5);
        assert!(matches!(
            OrderItem::snapshot(&product, 2),
            Err(EngineError::ValidationError(_))
        ));

        let line = OrderItem::snapshot(&product, 1).unwrap();
        let err = Order::new(1, UserId::new("u1"), shipping(), vec![line.clone(), line], Utc::now())
            .unwrap_err();
        assert!(matches!(err, EngineError::ValidationError(_)));
    }

    #[test]
    fn test_reference_prefers_order_number() {
        let mut order = order();
        assert_eq!(order.reference(), "#7");
        order.order_number = 0;
        assert_eq!(order.reference(), order.id.to_string());
    }

    #[test]
    fn test_mark_paid_only_once() {
        let mut order = order();
        assert!(order.mark_paid(Utc::now()));
        assert!(!order.mark_paid(Utc::now()));
        assert_eq!(order.status, OrderStatus::Paid);
    }

    #[test]
    fn test_paid_order_is_not_closed_by_rejection() {
        let mut order = order();
        order.mark_paid(Utc::now());
        assert!(!order.close_unpaid(OrderStatus::Cancelled, Utc::now()));
        assert_eq!(order.status, OrderStatus::Paid);
    }

    #[test]
    fn test_cancel_twice_is_invalid_state() {
        let mut order = order();
        order.cancel(Utc::now()).unwrap();
        assert!(matches!(
            order.cancel(Utc::now()),
            Err(EngineError::InvalidState(_))
        ));
    }

    #[test]
    fn test_ship_requires_paid() {
        let mut order = order();
        assert!(matches!(order.ship(Utc::now()), Err(EngineError::InvalidState(_))));
        order.mark_paid(Utc::now());
        order.ship(Utc::now()).unwrap();
        assert_eq!(order.status, OrderStatus::Shipped);
        assert!(order.shipped_at.is_some());
        assert!(order.ship(Utc::now()).is_err());
    }

    #[test]
    fn test_lifecycle_edges() {
        use OrderStatus::*;
        assert!(PendingPayment.can_transition_to(Refunded));
        assert!(Paid.can_transition_to(Refunded));
        assert!(!Cancelled.can_transition_to(Paid));
        assert!(!Shipped.can_transition_to(Cancelled));
        assert!(Shipped.is_terminal());
    }
}
