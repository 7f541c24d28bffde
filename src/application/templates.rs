//! HTML bodies of the customer emails.

use crate::domain::cart::PricedCart;
use crate::domain::money::Money;
use crate::domain::order::Order;

/// A rendered email, ready to hand to a mailer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub subject: String,
    pub html: String,
}

/// One row of the summary table: name, quantity, subtotal.
struct Row<'a> {
    name: &'a str,
    quantity: u32,
    subtotal: Money,
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn order_rows(order: &Order) -> Vec<Row<'_>> {
    order
        .items
        .iter()
        .map(|item| Row {
            name: &item.name,
            quantity: item.quantity,
            subtotal: item.subtotal,
        })
        .collect()
}

fn table(rows: &[Row<'_>], total: Money) -> String {
    let mut html = String::from(r#"<table style="width:100%;border-collapse:collapse;">"#);
    for row in rows {
        html.push_str(&format!(
            r#"<tr><td style="padding:8px 0;border-bottom:1px solid #eee;">{} &times; {}</td><td style="padding:8px 0;border-bottom:1px solid #eee;text-align:right;">{}</td></tr>"#,
            escape(row.name),
            row.quantity,
            row.subtotal
        ));
    }
    html.push_str(&format!(
        r#"<tr><td style="padding:10px 0;font-weight:bold;">Total</td><td style="padding:10px 0;font-weight:bold;text-align:right;">{total}</td></tr></table>"#
    ));
    html
}

fn order_box(order: &Order, body: &str) -> String {
    format!(
        r#"<div style="border:1px solid #eee;border-radius:12px;padding:14px;"><div style="font-size:12px;color:#666;">Order</div><div style="font-family:monospace;font-size:13px;margin:6px 0 12px;">{}</div>{body}</div>"#,
        escape(&order.reference())
    )
}

fn button(href: &str, label: &str) -> String {
    format!(
        r#"<p style="margin:14px 0 0;"><a href="{}" style="display:inline-block;background:#111;color:#fff;padding:10px 14px;border-radius:8px;text-decoration:none;">{label}</a></p>"#,
        escape(href)
    )
}

fn layout(heading: &str, greeting: &str, content: &str) -> String {
    format!(
        r#"<div style="font-family:Arial,sans-serif;max-width:560px;margin:0 auto;color:#111;"><h2 style="margin:0 0 10px;">{heading}</h2><p style="margin:0 0 18px;">{greeting}</p>{content}</div>"#
    )
}

pub fn payment_confirmed(customer: &str, order: &Order) -> Rendered {
    let content = format!(
        r#"{}<p style="margin:18px 0 0;color:#444;">We will let you know as soon as your order ships.</p>"#,
        order_box(order, &table(&order_rows(order), order.total))
    );
    Rendered {
        subject: "Payment confirmed".to_string(),
        html: layout(
            "Payment confirmed",
            &format!("Hi {}, we received your payment.", escape(customer)),
            &content,
        ),
    }
}

pub fn order_shipped(customer: &str, order: &Order) -> Rendered {
    let content = format!(
        r#"{}<p style="margin:18px 0 0;color:#444;">Thank you for shopping with us.</p>"#,
        order_box(order, "")
    );
    Rendered {
        subject: "Your order is on its way".to_string(),
        html: layout(
            "Your order has shipped",
            &format!("Hi {}, your order is on its way.", escape(customer)),
            &content,
        ),
    }
}

pub fn abandoned_cart(customer: &str, cart: &PricedCart, site_url: &str) -> Rendered {
    let rows: Vec<Row<'_>> = cart
        .lines
        .iter()
        .map(|priced| Row {
            name: &priced.line.name,
            quantity: priced.line.quantity,
            subtotal: priced.subtotal,
        })
        .collect();
    let content = format!(
        r#"<div style="border:1px solid #eee;border-radius:12px;padding:14px;">{}</div><p style="margin:18px 0 0;color:#444;">You can pick up where you left off.</p>{}"#,
        table(&rows, cart.total),
        button(&format!("{site_url}/cart"), "Go to cart")
    );
    Rendered {
        subject: "You left items in your cart".to_string(),
        html: layout(
            "Your cart is waiting",
            &format!("Hi {}, you left some products in your cart.", escape(customer)),
            &content,
        ),
    }
}

pub fn pending_payment(customer: &str, order: &Order, site_url: &str) -> Rendered {
    let content = format!(
        r#"{}<p style="margin:18px 0 0;color:#444;">You can resume the payment of order {} from your order page.</p>{}"#,
        order_box(order, &table(&order_rows(order), order.total)),
        escape(&order.reference()),
        button(
            &format!("{site_url}/pay/pending?orderId={}", order.id),
            "Continue payment"
        )
    );
    Rendered {
        subject: "Your payment is still pending".to_string(),
        html: layout(
            "Your payment is pending",
            &format!("Hi {}, your order has not been paid yet.", escape(customer)),
            &content,
        ),
    }
}
