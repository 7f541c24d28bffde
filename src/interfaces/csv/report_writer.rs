use crate::domain::order::Order;
use crate::domain::product::Product;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct ProductRow<'a> {
    id: &'a str,
    stock: u32,
    active: bool,
}

#[derive(Serialize)]
struct OrderRow<'a> {
    order: &'a str,
    user: &'a str,
    status: &'static str,
    total: String,
}

/// Writes end-of-run state reports as CSV tables, separated by a blank line.
pub struct ReportWriter<W: Write> {
    sink: W,
    tables: usize,
}

impl<W: Write> ReportWriter<W> {
    pub fn new(sink: W) -> Self {
        Self { sink, tables: 0 }
    }

    /// Starts a new table; the header is written even when no rows follow.
    fn table(&mut self, header: &[&str]) -> Result<csv::Writer<&mut W>> {
        if self.tables > 0 {
            writeln!(self.sink)?;
        }
        self.tables += 1;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(&mut self.sink);
        writer.write_record(header)?;
        Ok(writer)
    }

    /// One `id,stock,active` row per product.
    pub fn write_products(&mut self, products: &[Product]) -> Result<()> {
        let mut writer = self.table(&["id", "stock", "active"])?;
        for product in products {
            writer.serialize(ProductRow {
                id: product.id.as_str(),
                stock: product.stock,
                active: product.active,
            })?;
        }
        writer.flush()?;
        Ok(())
    }

    /// One `order,user,status,total` row per order. Totals are normalized, so
    /// `200.00` is written as `200`.
    pub fn write_orders(&mut self, orders: &[Order]) -> Result<()> {
        let mut writer = self.table(&["order", "user", "status", "total"])?;
        for order in orders {
            writer.serialize(OrderRow {
                order: order.id.as_str(),
                user: order.user_id.as_str(),
                status: order.status.as_str(),
                total: order.total.value().normalize().to_string(),
            })?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}
