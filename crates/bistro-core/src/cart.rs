use crate::error::BistroError;
use crate::storage::Store;
use crate::types::CartLine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Payload for adding a menu item to the caller's cart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartAdd {
    pub menu_item_id: i64,
    pub quantity: u32,
}

/// Outcome of a cart clear. An already-empty cart is a distinguishable
/// signal rather than an error so the binding layer can answer 404 vs 200.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearOutcome {
    Cleared { removed: usize },
    AlreadyEmpty,
}

/// Per-user cart ledger: one line per (user, menu item) pair.
///
/// Merge policy: re-adding a menu item accumulates the quantity, and the line
/// re-snapshots its unit price to the current catalog price so that
/// price == unit_price * quantity always holds against one coherent price.
/// Lines are never deleted individually; only bulk-cleared here or consumed
/// by order placement.
pub struct CartLedger {
    store: Arc<Store>,
}

impl CartLedger {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub async fn add_item(&self, user_id: i64, add: CartAdd) -> Result<CartLine, BistroError> {
        if add.quantity < 1 {
            return Err(BistroError::validation("Quantity must be at least 1."));
        }
        let line = self
            .store
            .add_cart_line(user_id, add.menu_item_id, add.quantity)
            .await?;
        info!(
            user_id,
            menu_item_id = add.menu_item_id,
            quantity = line.quantity,
            "cart line upserted"
        );
        Ok(line)
    }

    /// Cart lines for one user, ordered by menu item id — stable within a
    /// call.
    pub async fn list(&self, user_id: i64) -> Vec<CartLine> {
        self.store.cart_lines(user_id).await
    }

    pub async fn clear(&self, user_id: i64) -> Result<ClearOutcome, BistroError> {
        let removed = self.store.clear_cart(user_id).await?;
        if removed == 0 {
            Ok(ClearOutcome::AlreadyEmpty)
        } else {
            info!(user_id, removed, "cart cleared");
            Ok(ClearOutcome::Cleared { removed })
        }
    }
}
