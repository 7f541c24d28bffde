use crate::domain::cart::{CartLineInput, CartSnapshot};
use crate::domain::ids::UserId;
use crate::domain::ports::StoreRef;
use crate::error::Result;
use chrono::Utc;
use tracing::{debug, instrument};

/// Keeps the last reported cart of each user for abandonment reminders.
#[derive(Clone)]
pub struct CartService {
    store: StoreRef,
}

impl CartService {
    pub fn new(store: StoreRef) -> Self {
        Self { store }
    }

    /// Replaces the user's cart snapshot.
    ///
    /// Invalid lines are dropped. A cart with no valid line removes the
    /// snapshot; any other update re-arms the reminder.
    #[instrument(skip(self, lines), fields(user_id = %user_id))]
    pub async fn sync_cart(
        &self,
        user_id: UserId,
        lines: Vec<CartLineInput>,
    ) -> Result<Option<CartSnapshot>> {
        let lines: Vec<_> = lines.into_iter().filter_map(CartLineInput::normalize).collect();

        let mut tx = self.store.begin().await?;
        if lines.is_empty() {
            tx.delete_cart(&user_id).await?;
            tx.commit().await?;
            debug!("Cart cleared");
            return Ok(None);
        }

        let snapshot = CartSnapshot::new(user_id, &lines, Utc::now())?;
        tx.put_cart(snapshot.clone()).await?;
        tx.commit().await?;
        debug!(items = snapshot.item_count, "Cart synced");
        Ok(Some(snapshot))
    }
}
