use super::ids::UserId;
use super::money::Money;
use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

/// A cart line as reported by the client. Every field is untrusted.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct CartLineInput {
    #[serde(default)]
    pub product_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub quantity: Option<Decimal>,
}

/// A validated cart line, as stored in the snapshot.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct CartLine {
    pub product_id: String,
    pub name: String,
    pub price: Money,
    pub quantity: u32,
}

impl CartLine {
    pub fn subtotal(&self) -> Result<Money> {
        self.price.times(self.quantity)
    }
}

impl CartLineInput {
    /// Drops lines without id or name, with a price that is not a valid
    /// unit price, or with a quantity that is not positive once floored.
    pub fn normalize(self) -> Option<CartLine> {
        let product_id = self.product_id.trim().to_string();
        let name = self.name.trim().to_string();
        let price = Money::price(self.price?).ok()?;
        let quantity = self.quantity?.floor().to_u32().filter(|q| *q > 0)?;
        if product_id.is_empty() || name.is_empty() {
            return None;
        }
        Some(CartLine {
            product_id,
            name,
            price,
            quantity,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedLine {
    pub line: CartLine,
    pub subtotal: Money,
}

/// Cart lines with their subtotals and the cart total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedCart {
    pub lines: Vec<PricedLine>,
    pub total: Money,
}

impl PricedCart {
    pub fn new(lines: &[CartLine]) -> Result<Self> {
        let lines = lines
            .iter()
            .map(|line| {
                Ok(PricedLine {
                    subtotal: line.subtotal()?,
                    line: line.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let total = Money::total(lines.iter().map(|line| line.subtotal))?;
        Ok(Self { lines, total })
    }
}

fn unit_count(lines: &[CartLine]) -> Result<u32> {
    lines
        .iter()
        .try_fold(0u32, |count, line| count.checked_add(line.quantity))
        .ok_or_else(|| EngineError::ValidationError("Cart quantity is out of range".to_string()))
}

/// Last cart state reported by a user, kept only for abandonment reminders.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct CartSnapshot {
    pub user_id: UserId,
    /// Serialized `Vec<CartLine>`; parsed lazily by the reminder sweep.
    pub items_json: String,
    pub item_count: u32,
    pub reminder_sent_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl CartSnapshot {
    /// Fails with a validation error if the unit count or the cart total
    /// does not fit.
    pub fn new(user_id: UserId, lines: &[CartLine], now: DateTime<Utc>) -> Result<Self> {
        let item_count = unit_count(lines)?;
        PricedCart::new(lines)?;
        Ok(Self {
            user_id,
            items_json: serde_json::to_string(lines)?,
            item_count,
            reminder_sent_at: None,
            updated_at: now,
        })
    }

    pub fn lines(&self) -> Result<Vec<CartLine>> {
        Ok(serde_json::from_str(&self.items_json)?)
    }

    /// Parses and prices the stored lines.
    pub fn priced(&self) -> Result<PricedCart> {
        PricedCart::new(&self.lines()?)
    }

    /// Whether the abandoned-cart sweep should pick this snapshot up.
    pub fn needs_reminder(&self, cutoff: DateTime<Utc>) -> bool {
        self.item_count > 0 && self.reminder_sent_at.is_none() && self.updated_at <= cutoff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn input(quantity: Decimal) -> CartLineInput {
        CartLineInput {
            product_id: " A ".into(),
            name: "Mate".into(),
            price: Some(dec!(100)),
            quantity: Some(quantity),
        }
    }

    #[test]
    fn test_normalize_floors_quantity() {
        let line = input(dec!(2.7)).normalize().unwrap();
        assert_eq!(line.product_id, "A");
        assert_eq!(line.quantity, 2);
    }

    #[test]
    fn test_normalize_drops_invalid_lines() {
        assert!(input(dec!(0.5)).normalize().is_none());
        assert!(input(dec!(-1)).normalize().is_none());
        let mut negative = input(dec!(1));
        negative.price = Some(dec!(-1));
        assert!(negative.normalize().is_none());
        let mut unnamed = input(dec!(1));
        unnamed.name = "  ".into();
        assert!(unnamed.normalize().is_none());
        let mut huge = input(dec!(2));
        huge.price = Some(Decimal::MAX);
        assert!(huge.normalize().is_none());
    }

    #[test]
    fn test_unit_count_overflow_is_rejected() {
        let lines = vec![
            input(dec!(3000000000)).normalize().unwrap(),
            input(dec!(3000000000)).normalize().unwrap(),
        ];
        let err = CartSnapshot::new(UserId::new("u1"), &lines, Utc::now()).unwrap_err();
        assert!(matches!(err, EngineError::ValidationError(_)));
    }

    #[test]
    fn test_overflowing_stored_cart_cannot_be_priced() {
        let line = CartLine {
            product_id: "A".into(),
            name: "Mate".into(),
            price: Money::new(Decimal::MAX),
            quantity: 2,
        };
        let snapshot = CartSnapshot {
            user_id: UserId::new("u1"),
            items_json: serde_json::to_string(&[line]).unwrap(),
            item_count: 2,
            reminder_sent_at: None,
            updated_at: Utc::now(),
        };
        assert!(snapshot.lines().is_ok());
        assert!(matches!(snapshot.priced(), Err(EngineError::ValidationError(_))));
    }

    #[test]
    fn test_snapshot_counts_units() {
        let lines = vec![
            input(dec!(2)).normalize().unwrap(),
            input(dec!(3)).normalize().unwrap(),
        ];
        let snapshot = CartSnapshot::new(UserId::new("u1"), &lines, Utc::now()).unwrap();
        assert_eq!(snapshot.item_count, 5);
        assert_eq!(snapshot.lines().unwrap(), lines);
    }

    #[test]
    fn test_needs_reminder() {
        let now = Utc::now();
        let lines = vec![input(dec!(1)).normalize().unwrap()];
        let mut snapshot = CartSnapshot::new(UserId::new("u1"), &lines, now).unwrap();
        assert!(!snapshot.needs_reminder(now - Duration::minutes(10)));
        assert!(snapshot.needs_reminder(now));
        snapshot.reminder_sent_at = Some(now);
        assert!(!snapshot.needs_reminder(now));
    }
}
