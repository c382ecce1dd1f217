use crate::cart::{CartAdd, CartLedger, ClearOutcome};
use crate::catalog::{
    CatalogStore, CategoryInput, MenuItemFilter, MenuItemInput, MenuItemPatch, MenuItemSort,
};
use crate::error::BistroError;
use crate::groups::{GroupService, GroupUpdate};
use crate::orders::{OrderEngine, OrderFilter, OrderPatch, OrderSort};
use crate::policy::{AccessPolicy, Action};
use crate::storage::{StorageConfig, Store};
use crate::types::{CartLine, Category, MenuItem, Order, Role, RoleSet, UserAccount};
use std::sync::Arc;
use tracing::info;

/// Engine bootstrap configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub storage: StorageConfig,
}

/// Front door for every inbound action.
///
/// Each entrypoint names its [`Action`] and runs the access policy before
/// delegating to a component, so no handler ever re-derives role checks. The
/// binding layer resolves the caller's identity once (`resolve_actor`) and
/// passes it here; `None` means anonymous.
pub struct BistroEngine {
    store: Arc<Store>,
    catalog: CatalogStore,
    cart: CartLedger,
    orders: OrderEngine,
    groups: GroupService,
}

impl BistroEngine {
    pub async fn bootstrap(config: EngineConfig) -> Result<Self, BistroError> {
        let store = Arc::new(Store::bootstrap(config.storage).await?);
        info!(backend = store.backend_label(), "bistro engine bootstrapped");
        Ok(Self {
            catalog: CatalogStore::new(store.clone()),
            cart: CartLedger::new(store.clone()),
            orders: OrderEngine::new(store.clone()),
            groups: GroupService::new(store.clone()),
            store,
        })
    }

    pub fn storage_backend(&self) -> &'static str {
        self.store.backend_label()
    }

    /// Resolve an upstream-authenticated username into an account with its
    /// role set, auto-provisioning a customer row on first sight. Account
    /// creation proper is upstream's concern; the core only needs a stable id.
    pub async fn resolve_actor(&self, username: &str) -> Result<UserAccount, BistroError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(BistroError::validation("Username is required."));
        }
        self.store.get_or_insert_user(username).await
    }

    // ---- menu ----

    pub async fn list_menu_items(
        &self,
        actor: Option<&UserAccount>,
        filter: &MenuItemFilter,
        sort: Option<MenuItemSort>,
    ) -> Result<Vec<MenuItem>, BistroError> {
        AccessPolicy::authorize(actor, Action::MenuRead)?;
        self.catalog.list_menu_items(filter, sort).await
    }

    pub async fn menu_item(
        &self,
        actor: Option<&UserAccount>,
        id: i64,
    ) -> Result<MenuItem, BistroError> {
        AccessPolicy::authorize(actor, Action::MenuRead)?;
        self.catalog.menu_item(id).await
    }

    pub async fn create_menu_item(
        &self,
        actor: Option<&UserAccount>,
        input: MenuItemInput,
    ) -> Result<MenuItem, BistroError> {
        AccessPolicy::authorize(actor, Action::MenuWrite)?;
        self.catalog.create_menu_item(input).await
    }

    pub async fn update_menu_item(
        &self,
        actor: Option<&UserAccount>,
        id: i64,
        patch: MenuItemPatch,
    ) -> Result<MenuItem, BistroError> {
        AccessPolicy::authorize(actor, Action::MenuWrite)?;
        self.catalog.update_menu_item(id, patch).await
    }

    pub async fn delete_menu_item(
        &self,
        actor: Option<&UserAccount>,
        id: i64,
    ) -> Result<(), BistroError> {
        AccessPolicy::authorize(actor, Action::MenuWrite)?;
        self.catalog.delete_menu_item(id).await
    }

    pub async fn list_categories(
        &self,
        actor: Option<&UserAccount>,
    ) -> Result<Vec<Category>, BistroError> {
        AccessPolicy::authorize(actor, Action::MenuRead)?;
        Ok(self.catalog.categories().await)
    }

    pub async fn create_category(
        &self,
        actor: Option<&UserAccount>,
        input: CategoryInput,
    ) -> Result<Category, BistroError> {
        AccessPolicy::authorize(actor, Action::MenuWrite)?;
        self.catalog.create_category(input).await
    }

    // ---- cart ----

    pub async fn cart_lines(
        &self,
        actor: Option<&UserAccount>,
    ) -> Result<Vec<CartLine>, BistroError> {
        let actor = AccessPolicy::authenticate(actor)?;
        AccessPolicy::authorize(Some(actor), Action::CartAccess { owner: actor.id })?;
        Ok(self.cart.list(actor.id).await)
    }

    pub async fn add_to_cart(
        &self,
        actor: Option<&UserAccount>,
        add: CartAdd,
    ) -> Result<CartLine, BistroError> {
        let actor = AccessPolicy::authenticate(actor)?;
        AccessPolicy::authorize(Some(actor), Action::CartAccess { owner: actor.id })?;
        self.cart.add_item(actor.id, add).await
    }

    pub async fn clear_cart(
        &self,
        actor: Option<&UserAccount>,
    ) -> Result<ClearOutcome, BistroError> {
        let actor = AccessPolicy::authenticate(actor)?;
        AccessPolicy::authorize(Some(actor), Action::CartAccess { owner: actor.id })?;
        self.cart.clear(actor.id).await
    }

    // ---- orders ----

    pub async fn place_order(&self, actor: Option<&UserAccount>) -> Result<Order, BistroError> {
        let actor = AccessPolicy::authenticate(actor)?;
        AccessPolicy::authorize(Some(actor), Action::OrderPlace)?;
        self.orders.place(actor.id).await
    }

    pub async fn list_orders(
        &self,
        actor: Option<&UserAccount>,
        filter: &OrderFilter,
        sort: Option<OrderSort>,
    ) -> Result<Vec<Order>, BistroError> {
        let actor = AccessPolicy::authenticate(actor)?;
        AccessPolicy::authorize(Some(actor), Action::OrderRead)?;
        Ok(self
            .orders
            .list(AccessPolicy::order_scope(actor), filter, sort)
            .await)
    }

    pub async fn order(
        &self,
        actor: Option<&UserAccount>,
        id: i64,
    ) -> Result<Order, BistroError> {
        let actor = AccessPolicy::authenticate(actor)?;
        AccessPolicy::authorize(Some(actor), Action::OrderRead)?;
        self.orders.get(AccessPolicy::order_scope(actor), id).await
    }

    pub async fn update_order(
        &self,
        actor: Option<&UserAccount>,
        id: i64,
        patch: OrderPatch,
    ) -> Result<Order, BistroError> {
        let actor = AccessPolicy::authenticate(actor)?;
        AccessPolicy::authorize(Some(actor), Action::OrderMutate)?;
        self.orders.update(actor, id, patch).await
    }

    pub async fn delete_order(
        &self,
        actor: Option<&UserAccount>,
        id: i64,
    ) -> Result<(), BistroError> {
        let actor = AccessPolicy::authenticate(actor)?;
        AccessPolicy::authorize(Some(actor), Action::OrderDelete)?;
        self.orders
            .delete(AccessPolicy::order_scope(actor), id)
            .await
    }

    // ---- groups ----

    pub async fn add_group_member(
        &self,
        actor: Option<&UserAccount>,
        group_name: &str,
        username: &str,
    ) -> Result<GroupUpdate, BistroError> {
        AccessPolicy::authorize(actor, Action::GroupManage)?;
        self.groups.add_member(group_name, username).await
    }

    pub async fn remove_group_member(
        &self,
        actor: Option<&UserAccount>,
        group_name: &str,
        user_id: i64,
    ) -> Result<GroupUpdate, BistroError> {
        AccessPolicy::authorize(actor, Action::GroupManage)?;
        self.groups.remove_member(group_name, user_id).await
    }

    pub async fn group_members(
        &self,
        actor: Option<&UserAccount>,
        group_name: &str,
    ) -> Result<Vec<String>, BistroError> {
        AccessPolicy::authorize(actor, Action::GroupList)?;
        self.groups.members(group_name).await
    }

    // ---- seed ----

    /// Load the demo catalog and staff accounts. No-op when categories
    /// already exist, so restarts against a persistent backend stay clean.
    pub async fn seed_demo_data(&self) -> Result<(), BistroError> {
        if !self.store.categories().await.is_empty() {
            info!("seed skipped: catalog already populated");
            return Ok(());
        }

        let starters = self.store.insert_category("starters", "Starters").await?;
        let mains = self
            .store
            .insert_category("main-courses", "Main Courses")
            .await?;
        let desserts = self.store.insert_category("desserts", "Desserts").await?;

        self.store
            .insert_menu_item("Bruschetta", 850, false, starters.id)
            .await?;
        self.store
            .insert_menu_item("Greek Salad", 1_200, false, starters.id)
            .await?;
        self.store
            .insert_menu_item("Moussaka", 2_450, true, mains.id)
            .await?;
        self.store
            .insert_menu_item("Lasagna", 1_800, false, mains.id)
            .await?;
        self.store
            .insert_menu_item("Tiramisu", 1_050, true, desserts.id)
            .await?;
        self.store
            .insert_menu_item("Baklava", 900, false, desserts.id)
            .await?;

        let admin = self.store.insert_user("admin", true).await?;
        let manager = self.store.insert_user("maria", false).await?;
        self.store
            .update_user_roles(manager.id, RoleSet::of([Role::Manager]))
            .await?;
        let crew = self.store.insert_user("dan", false).await?;
        self.store
            .update_user_roles(crew.id, RoleSet::of([Role::DeliveryCrew]))
            .await?;
        self.store.insert_user("alice", false).await?;

        info!(admin_id = admin.id, "demo data seeded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OrderStatus;

    async fn seeded_engine() -> BistroEngine {
        let engine = BistroEngine::bootstrap(EngineConfig::default()).await.unwrap();
        engine.seed_demo_data().await.unwrap();
        engine
    }

    async fn actor(engine: &BistroEngine, username: &str) -> UserAccount {
        engine.resolve_actor(username).await.unwrap()
    }

    #[tokio::test]
    async fn anonymous_reads_menu_but_cannot_write() {
        let engine = seeded_engine().await;

        let items = engine
            .list_menu_items(None, &MenuItemFilter::default(), None)
            .await
            .unwrap();
        assert_eq!(items.len(), 6);

        let err = engine
            .create_menu_item(
                None,
                MenuItemInput {
                    title: "Pasta".to_string(),
                    price_minor: 1_500,
                    featured: false,
                    category_id: 1,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BistroError::Forbidden(_)));
    }

    #[tokio::test]
    async fn resolve_actor_auto_provisions_customers() {
        let engine = seeded_engine().await;
        let newcomer = actor(&engine, "walkin").await;
        assert!(!newcomer.superuser);
        assert!(!newcomer.roles.is_manager());

        let again = actor(&engine, "walkin").await;
        assert_eq!(newcomer.id, again.id);
    }

    #[tokio::test]
    async fn customer_cannot_update_any_order() {
        let engine = seeded_engine().await;
        let alice = actor(&engine, "alice").await;
        let bob = actor(&engine, "bob").await;

        let item = engine
            .list_menu_items(None, &MenuItemFilter::default(), None)
            .await
            .unwrap()[0]
            .clone();
        engine
            .add_to_cart(
                Some(&alice),
                CartAdd {
                    menu_item_id: item.id,
                    quantity: 1,
                },
            )
            .await
            .unwrap();
        let order = engine.place_order(Some(&alice)).await.unwrap();

        // Another customer's order, and even their own: both Forbidden.
        let patch = OrderPatch {
            status: Some(OrderStatus::Delivered),
            delivery_crew_id: None,
        };
        let err = engine
            .update_order(Some(&bob), order.id, patch.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, BistroError::Forbidden(_)));
        let err = engine
            .update_order(Some(&alice), order.id, patch)
            .await
            .unwrap_err();
        assert!(matches!(err, BistroError::Forbidden(_)));
    }

    #[tokio::test]
    async fn crew_flow_through_the_front_door() {
        let engine = seeded_engine().await;
        let alice = actor(&engine, "alice").await;
        let maria = actor(&engine, "maria").await;
        let dan = actor(&engine, "dan").await;

        let item = engine
            .list_menu_items(None, &MenuItemFilter::default(), None)
            .await
            .unwrap()[0]
            .clone();
        engine
            .add_to_cart(
                Some(&alice),
                CartAdd {
                    menu_item_id: item.id,
                    quantity: 2,
                },
            )
            .await
            .unwrap();
        let order = engine.place_order(Some(&alice)).await.unwrap();

        engine
            .update_order(
                Some(&maria),
                order.id,
                OrderPatch {
                    status: Some(OrderStatus::OutForDelivery),
                    delivery_crew_id: Some(dan.id),
                },
            )
            .await
            .unwrap();

        let assigned = engine
            .list_orders(Some(&dan), &OrderFilter::default(), None)
            .await
            .unwrap();
        assert_eq!(assigned.len(), 1);

        let delivered = engine
            .update_order(
                Some(&dan),
                order.id,
                OrderPatch {
                    status: Some(OrderStatus::Delivered),
                    delivery_crew_id: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(delivered.status, OrderStatus::Delivered);
    }

    #[tokio::test]
    async fn group_changes_need_manager_or_superuser() {
        let engine = seeded_engine().await;
        let alice = actor(&engine, "alice").await;
        let admin = actor(&engine, "admin").await;

        let err = engine
            .add_group_member(Some(&alice), "manager", "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, BistroError::Forbidden(_)));

        let update = engine
            .add_group_member(Some(&admin), "manager", "alice")
            .await
            .unwrap();
        assert!(update.changed);

        let alice = actor(&engine, "alice").await;
        assert!(alice.roles.is_manager());

        let members = engine
            .group_members(Some(&alice), "manager")
            .await
            .unwrap();
        assert!(members.contains(&"alice".to_string()));
        assert!(members.contains(&"maria".to_string()));
    }

    #[tokio::test]
    async fn seed_is_idempotent() {
        let engine = seeded_engine().await;
        engine.seed_demo_data().await.unwrap();
        let items = engine
            .list_menu_items(None, &MenuItemFilter::default(), None)
            .await
            .unwrap();
        assert_eq!(items.len(), 6);
    }
}
