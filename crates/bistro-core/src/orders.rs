use crate::error::BistroError;
use crate::policy::{AccessPolicy, OrderScope};
use crate::storage::Store;
use crate::types::{Order, OrderStatus, Role, UserAccount};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Partial update for an order.
///
/// Unknown fields are rejected at deserialization, which is what makes the
/// delivery-crew rule ("the field set must be exactly {status}") checkable on
/// the typed payload: anything else a caller sends either fails to parse or
/// shows up in `delivery_crew_id`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrderPatch {
    pub status: Option<OrderStatus>,
    #[serde(alias = "delivery_crew")]
    pub delivery_crew_id: Option<i64>,
}

/// Listing filter, by lifecycle state.
#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
}

/// Listing order, parsed from the `ordering` query parameter form
/// (`total`, `-total`, `date`, `-date`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSort {
    TotalAsc,
    TotalDesc,
    DateAsc,
    DateDesc,
}

impl OrderSort {
    pub fn from_param(param: &str) -> Option<Self> {
        match param {
            "total" => Some(Self::TotalAsc),
            "-total" => Some(Self::TotalDesc),
            "date" => Some(Self::DateAsc),
            "-date" => Some(Self::DateDesc),
            _ => None,
        }
    }
}

/// Order lifecycle engine: atomic cart conversion, scoped reads, and the
/// role-split update pathway.
pub struct OrderEngine {
    store: Arc<Store>,
}

impl OrderEngine {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Convert the caller's cart into an order. The conversion is a single
    /// storage transaction: order row, item snapshots and cart deletion land
    /// together or not at all, so two concurrent placements cannot both
    /// consume the same cart.
    pub async fn place(&self, user_id: i64) -> Result<Order, BistroError> {
        let order = self.store.convert_cart(user_id).await?;
        info!(
            order_id = order.id,
            user_id,
            total_minor = order.total_minor,
            items = order.items.len(),
            "order placed"
        );
        Ok(order)
    }

    pub async fn list(
        &self,
        scope: OrderScope,
        filter: &OrderFilter,
        sort: Option<OrderSort>,
    ) -> Vec<Order> {
        let mut orders = self.store.orders().await;
        orders.retain(|order| scope.permits(order));
        if let Some(status) = filter.status {
            orders.retain(|order| order.status == status);
        }
        match sort {
            Some(OrderSort::TotalAsc) => orders.sort_by_key(|order| order.total_minor),
            Some(OrderSort::TotalDesc) => {
                orders.sort_by_key(|order| std::cmp::Reverse(order.total_minor))
            }
            Some(OrderSort::DateAsc) => orders.sort_by_key(|order| order.placed_at),
            Some(OrderSort::DateDesc) => {
                orders.sort_by_key(|order| std::cmp::Reverse(order.placed_at))
            }
            None => {}
        }
        orders
    }

    /// Fetch one order under the caller's visibility scope. Orders outside
    /// the scope are indistinguishable from absent ones.
    pub async fn get(&self, scope: OrderScope, id: i64) -> Result<Order, BistroError> {
        self.store
            .order(id)
            .await
            .filter(|order| scope.permits(order))
            .ok_or_else(|| BistroError::not_found("Order not found."))
    }

    /// Role-split update pathway:
    /// - managers may set `status` and/or `delivery_crew_id`; the assignee
    ///   must exist and hold the delivery-crew role;
    /// - delivery crew may set `status` alone, and only on orders assigned
    ///   to them (anything outside their scope reads as absent);
    /// - totals, owner and item snapshots are not reachable from here at all.
    ///
    /// Customers never get this far; the access policy rejects them before
    /// dispatch.
    pub async fn update(
        &self,
        actor: &UserAccount,
        id: i64,
        patch: OrderPatch,
    ) -> Result<Order, BistroError> {
        let scope = AccessPolicy::order_scope(actor);
        let mut order = self.get(scope, id).await?;

        if actor.roles.is_manager() {
            if let Some(crew_id) = patch.delivery_crew_id {
                let crew = self
                    .store
                    .user(crew_id)
                    .await
                    .ok_or_else(|| BistroError::not_found("User not found."))?;
                if !crew.roles.contains(Role::DeliveryCrew) {
                    return Err(BistroError::validation(
                        "Assigned user is not a delivery crew member.",
                    ));
                }
                order.delivery_crew_id = Some(crew.id);
            }
            if let Some(status) = patch.status {
                order.status = status;
            }
        } else {
            match (patch.status, patch.delivery_crew_id) {
                (Some(status), None) => order.status = status,
                _ => {
                    return Err(BistroError::validation(
                        "You can only update the status field.",
                    ))
                }
            }
        }

        let order = self.store.update_order(order).await?;
        info!(
            order_id = order.id,
            status = order.status.as_str(),
            delivery_crew_id = ?order.delivery_crew_id,
            "order updated"
        );
        Ok(order)
    }

    pub async fn delete(&self, scope: OrderScope, id: i64) -> Result<(), BistroError> {
        // Resolve under the scope first so invisible orders read as absent.
        let order = self.get(scope, id).await?;
        self.store.delete_order(order.id).await?;
        info!(order_id = order.id, "order deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageConfig;
    use crate::types::RoleSet;

    struct Fixture {
        engine: OrderEngine,
        store: Arc<Store>,
        customer: UserAccount,
        manager: UserAccount,
        crew: UserAccount,
        item_a: i64,
        item_b: i64,
    }

    async fn setup() -> Fixture {
        let store = Arc::new(Store::bootstrap(StorageConfig::memory()).await.unwrap());
        let customer = store.insert_user("alice", false).await.unwrap();
        let manager = store.insert_user("maria", false).await.unwrap();
        let manager = store
            .update_user_roles(manager.id, RoleSet::of([Role::Manager]))
            .await
            .unwrap();
        let crew = store.insert_user("dan", false).await.unwrap();
        let crew = store
            .update_user_roles(crew.id, RoleSet::of([Role::DeliveryCrew]))
            .await
            .unwrap();

        let category = store.insert_category("mains", "Main Courses").await.unwrap();
        let item_a = store
            .insert_menu_item("Moussaka", 1_000, true, category.id)
            .await
            .unwrap();
        let item_b = store
            .insert_menu_item("Lasagna", 500, false, category.id)
            .await
            .unwrap();

        Fixture {
            engine: OrderEngine::new(store.clone()),
            store,
            customer,
            manager,
            crew,
            item_a: item_a.id,
            item_b: item_b.id,
        }
    }

    async fn place_base_order(fx: &Fixture) -> Order {
        fx.store
            .add_cart_line(fx.customer.id, fx.item_a, 2)
            .await
            .unwrap();
        fx.store
            .add_cart_line(fx.customer.id, fx.item_b, 1)
            .await
            .unwrap();
        fx.engine.place(fx.customer.id).await.unwrap()
    }

    #[tokio::test]
    async fn placement_totals_and_empties_cart() {
        let fx = setup().await;
        let order = place_base_order(&fx).await;

        assert_eq!(order.total_minor, 2_500);
        assert_eq!(order.items.len(), 2);
        assert_eq!(
            order.total_minor,
            order.items.iter().map(|item| item.price_minor).sum::<u64>()
        );
        assert!(fx.store.cart_lines(fx.customer.id).await.is_empty());
    }

    #[tokio::test]
    async fn snapshot_survives_catalog_reprice() {
        let fx = setup().await;
        let order = place_base_order(&fx).await;

        let mut repriced = fx.store.menu_item(fx.item_a).await.unwrap();
        repriced.price_minor = 1_200;
        fx.store.update_menu_item(repriced).await.unwrap();

        let stored = fx.store.order(order.id).await.unwrap();
        assert_eq!(stored.total_minor, 2_500);
        let snapshot = stored
            .items
            .iter()
            .find(|item| item.menu_item_id == fx.item_a)
            .unwrap();
        assert_eq!(snapshot.unit_price_minor, 1_000);
        assert_eq!(snapshot.price_minor, 2_000);
    }

    #[tokio::test]
    async fn empty_cart_cannot_place() {
        let fx = setup().await;
        let err = fx.engine.place(fx.customer.id).await.unwrap_err();
        assert!(matches!(err, BistroError::Validation(_)));
    }

    #[tokio::test]
    async fn manager_assigns_crew_and_status() {
        let fx = setup().await;
        let order = place_base_order(&fx).await;

        let patch = OrderPatch {
            status: Some(OrderStatus::OutForDelivery),
            delivery_crew_id: Some(fx.crew.id),
        };
        let updated = fx.engine.update(&fx.manager, order.id, patch).await.unwrap();
        assert_eq!(updated.status, OrderStatus::OutForDelivery);
        assert_eq!(updated.delivery_crew_id, Some(fx.crew.id));
    }

    #[tokio::test]
    async fn manager_cannot_assign_non_crew_user() {
        let fx = setup().await;
        let order = place_base_order(&fx).await;

        let patch = OrderPatch {
            status: None,
            delivery_crew_id: Some(fx.customer.id),
        };
        let err = fx
            .engine
            .update(&fx.manager, order.id, patch)
            .await
            .unwrap_err();
        assert!(matches!(err, BistroError::Validation(_)));

        let missing = OrderPatch {
            status: None,
            delivery_crew_id: Some(999),
        };
        let err = fx
            .engine
            .update(&fx.manager, order.id, missing)
            .await
            .unwrap_err();
        assert!(matches!(err, BistroError::NotFound(_)));
    }

    #[tokio::test]
    async fn crew_updates_status_on_assigned_order_only() {
        let fx = setup().await;
        let order = place_base_order(&fx).await;

        // Not yet assigned: invisible to the crew member.
        let patch = OrderPatch {
            status: Some(OrderStatus::Delivered),
            delivery_crew_id: None,
        };
        let err = fx
            .engine
            .update(&fx.crew, order.id, patch.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, BistroError::NotFound(_)));

        fx.engine
            .update(
                &fx.manager,
                order.id,
                OrderPatch {
                    status: None,
                    delivery_crew_id: Some(fx.crew.id),
                },
            )
            .await
            .unwrap();

        let updated = fx.engine.update(&fx.crew, order.id, patch).await.unwrap();
        assert_eq!(updated.status, OrderStatus::Delivered);
    }

    #[tokio::test]
    async fn crew_may_touch_nothing_but_status() {
        let fx = setup().await;
        let order = place_base_order(&fx).await;
        fx.engine
            .update(
                &fx.manager,
                order.id,
                OrderPatch {
                    status: None,
                    delivery_crew_id: Some(fx.crew.id),
                },
            )
            .await
            .unwrap();

        let err = fx
            .engine
            .update(
                &fx.crew,
                order.id,
                OrderPatch {
                    status: Some(OrderStatus::Delivered),
                    delivery_crew_id: Some(fx.crew.id),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BistroError::Validation(_)));

        let err = fx
            .engine
            .update(&fx.crew, order.id, OrderPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BistroError::Validation(_)));
    }

    #[tokio::test]
    async fn scopes_limit_listing_and_fetch() {
        let fx = setup().await;
        let order = place_base_order(&fx).await;

        let all = fx
            .engine
            .list(OrderScope::All, &OrderFilter::default(), None)
            .await;
        assert_eq!(all.len(), 1);

        let own = fx
            .engine
            .list(
                OrderScope::OwnedBy(fx.customer.id),
                &OrderFilter::default(),
                None,
            )
            .await;
        assert_eq!(own.len(), 1);

        let foreign = fx
            .engine
            .get(OrderScope::OwnedBy(fx.manager.id), order.id)
            .await
            .unwrap_err();
        assert!(matches!(foreign, BistroError::NotFound(_)));

        let unassigned = fx
            .engine
            .list(
                OrderScope::AssignedTo(fx.crew.id),
                &OrderFilter::default(),
                None,
            )
            .await;
        assert!(unassigned.is_empty());
    }

    #[tokio::test]
    async fn status_filter_and_total_sort() {
        let fx = setup().await;
        let first = place_base_order(&fx).await;
        fx.store
            .add_cart_line(fx.customer.id, fx.item_b, 1)
            .await
            .unwrap();
        let second = fx.engine.place(fx.customer.id).await.unwrap();

        fx.engine
            .update(
                &fx.manager,
                first.id,
                OrderPatch {
                    status: Some(OrderStatus::Delivered),
                    delivery_crew_id: None,
                },
            )
            .await
            .unwrap();

        let pending = fx
            .engine
            .list(
                OrderScope::All,
                &OrderFilter {
                    status: Some(OrderStatus::Pending),
                },
                None,
            )
            .await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, second.id);

        let by_total = fx
            .engine
            .list(OrderScope::All, &OrderFilter::default(), Some(OrderSort::TotalDesc))
            .await;
        assert_eq!(by_total[0].id, first.id);
    }

    #[tokio::test]
    async fn delete_respects_scope() {
        let fx = setup().await;
        let order = place_base_order(&fx).await;

        let err = fx
            .engine
            .delete(OrderScope::OwnedBy(fx.crew.id), order.id)
            .await
            .unwrap_err();
        assert!(matches!(err, BistroError::NotFound(_)));

        fx.engine.delete(OrderScope::All, order.id).await.unwrap();
        assert!(fx.store.order(order.id).await.is_none());
    }
}
