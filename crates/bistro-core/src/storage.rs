use crate::error::BistroError;
use crate::types::{CartLine, Category, MenuItem, Order, OrderItem, OrderStatus, RoleSet, UserAccount};
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Entity persistence backend configuration.
#[derive(Debug, Clone)]
pub enum StorageConfig {
    /// Keep all entity tables in process memory only.
    Memory,
    /// Persist all entities in PostgreSQL and hydrate tables on startup.
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

impl StorageConfig {
    pub fn memory() -> Self {
        Self::Memory
    }

    pub fn postgres(database_url: impl Into<String>, max_connections: u32) -> Self {
        Self::Postgres {
            database_url: database_url.into(),
            max_connections,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Postgres { .. } => "postgres",
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Memory
    }
}

#[derive(Debug, Default)]
struct Tables {
    categories: BTreeMap<i64, Category>,
    menu_items: BTreeMap<i64, MenuItem>,
    users: BTreeMap<i64, UserAccount>,
    // Keyed by (user_id, menu_item_id): one line per pair, iteration order
    // stable by menu item within a user.
    cart_lines: BTreeMap<(i64, i64), CartLine>,
    orders: BTreeMap<i64, Order>,
    next_category_id: i64,
    next_menu_item_id: i64,
    next_user_id: i64,
    next_order_id: i64,
    next_order_item_id: i64,
}

impl Tables {
    fn empty() -> Self {
        Self {
            next_category_id: 1,
            next_menu_item_id: 1,
            next_user_id: 1,
            next_order_id: 1,
            next_order_item_id: 1,
            ..Self::default()
        }
    }
}

#[derive(Debug)]
enum StorageBackend {
    Memory,
    Postgres(PostgresStore),
}

/// Entity store that keeps in-memory authoritative tables while optionally
/// mirroring every mutation to PostgreSQL.
///
/// Invariant handling:
/// - Each mutation runs under a single write lock; multi-row operations
///   (cart conversion, cascading deletes) are visible all-or-nothing.
/// - When the mirror is active, rows are persisted (in one SQL transaction
///   for multi-row operations) before the in-memory commit, so a mirror
///   failure leaves memory untouched.
/// - On startup, PostgreSQL rows are hydrated and id sequences re-derived.
#[derive(Debug)]
pub struct Store {
    tables: RwLock<Tables>,
    backend: StorageBackend,
}

impl Store {
    pub async fn bootstrap(config: StorageConfig) -> Result<Self, BistroError> {
        match config {
            StorageConfig::Memory => Ok(Self {
                tables: RwLock::new(Tables::empty()),
                backend: StorageBackend::Memory,
            }),
            StorageConfig::Postgres {
                database_url,
                max_connections,
            } => {
                let store = PostgresStore::connect(&database_url, max_connections).await?;
                store.ensure_schema().await?;
                let tables = store.load_tables().await?;
                Ok(Self {
                    tables: RwLock::new(tables),
                    backend: StorageBackend::Postgres(store),
                })
            }
        }
    }

    pub fn backend_label(&self) -> &'static str {
        match self.backend {
            StorageBackend::Memory => "memory",
            StorageBackend::Postgres(_) => "postgres",
        }
    }

    // ---- categories ----

    pub async fn insert_category(
        &self,
        slug: impl Into<String>,
        title: impl Into<String>,
    ) -> Result<Category, BistroError> {
        let slug = slug.into();
        let title = title.into();
        let mut tables = self.tables.write().await;
        if tables.categories.values().any(|c| c.slug == slug) {
            return Err(BistroError::conflict(
                "A category with this slug already exists.",
            ));
        }
        let category = Category {
            id: tables.next_category_id,
            slug,
            title,
        };
        if let StorageBackend::Postgres(store) = &self.backend {
            store.insert_category(&category).await?;
        }
        tables.next_category_id += 1;
        tables.categories.insert(category.id, category.clone());
        Ok(category)
    }

    pub async fn categories(&self) -> Vec<Category> {
        self.tables.read().await.categories.values().cloned().collect()
    }

    pub async fn category(&self, id: i64) -> Option<Category> {
        self.tables.read().await.categories.get(&id).cloned()
    }

    pub async fn category_by_slug(&self, slug: &str) -> Option<Category> {
        self.tables
            .read()
            .await
            .categories
            .values()
            .find(|c| c.slug == slug)
            .cloned()
    }

    // ---- menu items ----

    pub async fn insert_menu_item(
        &self,
        title: impl Into<String>,
        price_minor: u64,
        featured: bool,
        category_id: i64,
    ) -> Result<MenuItem, BistroError> {
        let mut tables = self.tables.write().await;
        let item = MenuItem {
            id: tables.next_menu_item_id,
            title: title.into(),
            price_minor,
            featured,
            category_id,
        };
        if let StorageBackend::Postgres(store) = &self.backend {
            store.insert_menu_item(&item).await?;
        }
        tables.next_menu_item_id += 1;
        tables.menu_items.insert(item.id, item.clone());
        Ok(item)
    }

    pub async fn update_menu_item(&self, item: MenuItem) -> Result<MenuItem, BistroError> {
        let mut tables = self.tables.write().await;
        if !tables.menu_items.contains_key(&item.id) {
            return Err(BistroError::not_found("Menu item not found."));
        }
        if let StorageBackend::Postgres(store) = &self.backend {
            store.update_menu_item(&item).await?;
        }
        tables.menu_items.insert(item.id, item.clone());
        Ok(item)
    }

    /// Remove a menu item, cascading over cart lines that reference it.
    /// Order item snapshots are left untouched.
    pub async fn delete_menu_item(&self, id: i64) -> Result<bool, BistroError> {
        let mut tables = self.tables.write().await;
        if !tables.menu_items.contains_key(&id) {
            return Ok(false);
        }
        if let StorageBackend::Postgres(store) = &self.backend {
            store.delete_menu_item(id).await?;
        }
        tables.cart_lines.retain(|_, line| line.menu_item_id != id);
        tables.menu_items.remove(&id);
        Ok(true)
    }

    pub async fn menu_item(&self, id: i64) -> Option<MenuItem> {
        self.tables.read().await.menu_items.get(&id).cloned()
    }

    pub async fn menu_items(&self) -> Vec<MenuItem> {
        self.tables.read().await.menu_items.values().cloned().collect()
    }

    // ---- users ----

    pub async fn user(&self, id: i64) -> Option<UserAccount> {
        self.tables.read().await.users.get(&id).cloned()
    }

    pub async fn user_by_username(&self, username: &str) -> Option<UserAccount> {
        self.tables
            .read()
            .await
            .users
            .values()
            .find(|u| u.username == username)
            .cloned()
    }

    pub async fn insert_user(
        &self,
        username: impl Into<String>,
        superuser: bool,
    ) -> Result<UserAccount, BistroError> {
        let username = username.into();
        let mut tables = self.tables.write().await;
        if tables.users.values().any(|u| u.username == username) {
            return Err(BistroError::conflict("Username is already taken."));
        }
        let user = UserAccount {
            id: tables.next_user_id,
            username,
            superuser,
            roles: RoleSet::empty(),
        };
        if let StorageBackend::Postgres(store) = &self.backend {
            store.insert_user(&user).await?;
        }
        tables.next_user_id += 1;
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    /// Fetch-or-create for upstream-authenticated usernames. New accounts are
    /// plain customers.
    pub async fn get_or_insert_user(&self, username: &str) -> Result<UserAccount, BistroError> {
        let mut tables = self.tables.write().await;
        if let Some(user) = tables.users.values().find(|u| u.username == username) {
            return Ok(user.clone());
        }
        let user = UserAccount {
            id: tables.next_user_id,
            username: username.to_string(),
            superuser: false,
            roles: RoleSet::empty(),
        };
        if let StorageBackend::Postgres(store) = &self.backend {
            store.insert_user(&user).await?;
        }
        tables.next_user_id += 1;
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    pub async fn update_user_roles(
        &self,
        id: i64,
        roles: RoleSet,
    ) -> Result<UserAccount, BistroError> {
        let mut tables = self.tables.write().await;
        let Some(existing) = tables.users.get(&id) else {
            return Err(BistroError::not_found("User not found."));
        };
        let mut user = existing.clone();
        user.roles = roles;
        if let StorageBackend::Postgres(store) = &self.backend {
            store.update_user_roles(&user).await?;
        }
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    pub async fn users(&self) -> Vec<UserAccount> {
        self.tables.read().await.users.values().cloned().collect()
    }

    // ---- cart ----

    /// Add-or-merge a cart line for (user, menu item).
    ///
    /// On merge the unit price is re-snapshotted to the current catalog price
    /// and the line price recomputed against the accumulated quantity, so the
    /// line invariant price == unit_price * quantity holds against a single
    /// coherent unit price.
    pub async fn add_cart_line(
        &self,
        user_id: i64,
        menu_item_id: i64,
        quantity: u32,
    ) -> Result<CartLine, BistroError> {
        let mut tables = self.tables.write().await;
        let Some(item) = tables.menu_items.get(&menu_item_id) else {
            return Err(BistroError::not_found("Menu item does not exist."));
        };
        let unit_price_minor = item.price_minor;
        let existing = tables
            .cart_lines
            .get(&(user_id, menu_item_id))
            .map(|line| line.quantity)
            .unwrap_or(0);
        let quantity = existing
            .checked_add(quantity)
            .ok_or_else(|| BistroError::validation("Cart quantity exceeds the representable range."))?;
        let price_minor = unit_price_minor
            .checked_mul(u64::from(quantity))
            .ok_or_else(|| BistroError::validation("Cart line price exceeds the representable range."))?;
        let line = CartLine {
            user_id,
            menu_item_id,
            quantity,
            unit_price_minor,
            price_minor,
        };
        if let StorageBackend::Postgres(store) = &self.backend {
            store.upsert_cart_line(&line).await?;
        }
        tables.cart_lines.insert((user_id, menu_item_id), line.clone());
        Ok(line)
    }

    pub async fn cart_lines(&self, user_id: i64) -> Vec<CartLine> {
        self.tables
            .read()
            .await
            .cart_lines
            .range((user_id, i64::MIN)..=(user_id, i64::MAX))
            .map(|(_, line)| line.clone())
            .collect()
    }

    /// Delete all cart lines for a user; returns how many were removed.
    pub async fn clear_cart(&self, user_id: i64) -> Result<usize, BistroError> {
        let mut tables = self.tables.write().await;
        let removed = tables
            .cart_lines
            .range((user_id, i64::MIN)..=(user_id, i64::MAX))
            .count();
        if removed == 0 {
            return Ok(0);
        }
        if let StorageBackend::Postgres(store) = &self.backend {
            store.clear_cart(user_id).await?;
        }
        tables.cart_lines.retain(|_, line| line.user_id != user_id);
        Ok(removed)
    }

    // ---- orders ----

    /// The cart -> order transaction. Under one write lock (and one SQL
    /// transaction when the mirror is active): snapshot every cart line into
    /// an order item, total them, create the order, delete the cart lines.
    /// All fallible work happens before the first in-memory mutation, so any
    /// failure leaves both the cart and the order table untouched.
    pub async fn convert_cart(&self, user_id: i64) -> Result<Order, BistroError> {
        let mut tables = self.tables.write().await;
        let lines: Vec<CartLine> = tables
            .cart_lines
            .range((user_id, i64::MIN)..=(user_id, i64::MAX))
            .map(|(_, line)| line.clone())
            .collect();
        if lines.is_empty() {
            return Err(BistroError::validation(
                "Cart is empty, cannot place an order.",
            ));
        }

        let mut total_minor: u64 = 0;
        for line in &lines {
            total_minor = total_minor.checked_add(line.price_minor).ok_or_else(|| {
                BistroError::validation("Order total exceeds the representable range.")
            })?;
        }

        let order_id = tables.next_order_id;
        let mut next_item_id = tables.next_order_item_id;
        let mut items = Vec::with_capacity(lines.len());
        for line in &lines {
            items.push(OrderItem {
                id: next_item_id,
                order_id,
                menu_item_id: line.menu_item_id,
                quantity: line.quantity,
                unit_price_minor: line.unit_price_minor,
                price_minor: line.price_minor,
            });
            next_item_id += 1;
        }
        let order = Order {
            id: order_id,
            user_id,
            delivery_crew_id: None,
            status: OrderStatus::Pending,
            total_minor,
            placed_at: Utc::now(),
            items,
        };

        if let StorageBackend::Postgres(store) = &self.backend {
            store.insert_order_and_clear_cart(&order).await?;
        }

        tables.cart_lines.retain(|_, line| line.user_id != user_id);
        tables.orders.insert(order.id, order.clone());
        tables.next_order_id = order_id + 1;
        tables.next_order_item_id = next_item_id;
        Ok(order)
    }

    pub async fn order(&self, id: i64) -> Option<Order> {
        self.tables.read().await.orders.get(&id).cloned()
    }

    pub async fn orders(&self) -> Vec<Order> {
        self.tables.read().await.orders.values().cloned().collect()
    }

    /// Persist mutated order fields (status, delivery crew). Items and totals
    /// are immutable and never written back.
    pub async fn update_order(&self, order: Order) -> Result<Order, BistroError> {
        let mut tables = self.tables.write().await;
        if !tables.orders.contains_key(&order.id) {
            return Err(BistroError::not_found("Order not found."));
        }
        if let StorageBackend::Postgres(store) = &self.backend {
            store.update_order(&order).await?;
        }
        tables.orders.insert(order.id, order.clone());
        Ok(order)
    }

    pub async fn delete_order(&self, id: i64) -> Result<bool, BistroError> {
        let mut tables = self.tables.write().await;
        if !tables.orders.contains_key(&id) {
            return Ok(false);
        }
        if let StorageBackend::Postgres(store) = &self.backend {
            store.delete_order(id).await?;
        }
        tables.orders.remove(&id);
        Ok(true)
    }
}

fn storage_err(context: &str, err: impl std::fmt::Display) -> BistroError {
    BistroError::Storage(format!("{context}: {err}"))
}

fn to_db_amount(value: u64, what: &str) -> Result<i64, BistroError> {
    i64::try_from(value)
        .map_err(|_| BistroError::Storage(format!("{what} exceeds postgres BIGINT range")))
}

fn from_db_amount(value: i64, what: &str) -> Result<u64, BistroError> {
    u64::try_from(value).map_err(|_| BistroError::Storage(format!("negative {what} in storage")))
}

#[derive(Debug)]
struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    async fn connect(database_url: &str, max_connections: u32) -> Result<Self, BistroError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .map_err(|e| storage_err("postgres connect failed", e))?;
        Ok(Self { pool })
    }

    async fn ensure_schema(&self) -> Result<(), BistroError> {
        // One table per entity; the application controls id assignment so the
        // in-memory sequences stay authoritative.
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS categories (
                id BIGINT PRIMARY KEY,
                slug TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS menu_items (
                id BIGINT PRIMARY KEY,
                title TEXT NOT NULL,
                price_minor BIGINT NOT NULL,
                featured BOOLEAN NOT NULL,
                category_id BIGINT NOT NULL REFERENCES categories (id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id BIGINT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                superuser BOOLEAN NOT NULL,
                roles JSONB NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS cart_lines (
                user_id BIGINT NOT NULL REFERENCES users (id),
                menu_item_id BIGINT NOT NULL REFERENCES menu_items (id),
                quantity BIGINT NOT NULL,
                unit_price_minor BIGINT NOT NULL,
                price_minor BIGINT NOT NULL,
                PRIMARY KEY (user_id, menu_item_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS orders (
                id BIGINT PRIMARY KEY,
                user_id BIGINT NOT NULL REFERENCES users (id),
                delivery_crew_id BIGINT NULL REFERENCES users (id),
                status TEXT NOT NULL,
                total_minor BIGINT NOT NULL,
                placed_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS order_items (
                id BIGINT PRIMARY KEY,
                order_id BIGINT NOT NULL REFERENCES orders (id) ON DELETE CASCADE,
                menu_item_id BIGINT NOT NULL,
                quantity BIGINT NOT NULL,
                unit_price_minor BIGINT NOT NULL,
                price_minor BIGINT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_orders_user_id ON orders (user_id)",
            "CREATE INDEX IF NOT EXISTS idx_orders_delivery_crew_id ON orders (delivery_crew_id)",
            "CREATE INDEX IF NOT EXISTS idx_order_items_order_id ON order_items (order_id)",
        ];
        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| storage_err("postgres schema create failed", e))?;
        }
        Ok(())
    }

    async fn load_tables(&self) -> Result<Tables, BistroError> {
        let mut tables = Tables::empty();

        let rows = sqlx::query("SELECT id, slug, title FROM categories ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| storage_err("postgres load categories failed", e))?;
        for row in rows {
            let category = Category {
                id: row.try_get("id").map_err(|e| storage_err("decode category", e))?,
                slug: row.try_get("slug").map_err(|e| storage_err("decode category", e))?,
                title: row.try_get("title").map_err(|e| storage_err("decode category", e))?,
            };
            tables.next_category_id = tables.next_category_id.max(category.id + 1);
            tables.categories.insert(category.id, category);
        }

        let rows = sqlx::query(
            "SELECT id, title, price_minor, featured, category_id FROM menu_items ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_err("postgres load menu items failed", e))?;
        for row in rows {
            let price: i64 = row
                .try_get("price_minor")
                .map_err(|e| storage_err("decode menu item", e))?;
            let item = MenuItem {
                id: row.try_get("id").map_err(|e| storage_err("decode menu item", e))?,
                title: row.try_get("title").map_err(|e| storage_err("decode menu item", e))?,
                price_minor: from_db_amount(price, "menu item price")?,
                featured: row
                    .try_get("featured")
                    .map_err(|e| storage_err("decode menu item", e))?,
                category_id: row
                    .try_get("category_id")
                    .map_err(|e| storage_err("decode menu item", e))?,
            };
            tables.next_menu_item_id = tables.next_menu_item_id.max(item.id + 1);
            tables.menu_items.insert(item.id, item);
        }

        let rows = sqlx::query("SELECT id, username, superuser, roles FROM users ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| storage_err("postgres load users failed", e))?;
        for row in rows {
            let roles: serde_json::Value = row
                .try_get("roles")
                .map_err(|e| storage_err("decode user", e))?;
            let user = UserAccount {
                id: row.try_get("id").map_err(|e| storage_err("decode user", e))?,
                username: row
                    .try_get("username")
                    .map_err(|e| storage_err("decode user", e))?,
                superuser: row
                    .try_get("superuser")
                    .map_err(|e| storage_err("decode user", e))?,
                roles: serde_json::from_value(roles)
                    .map_err(|e| BistroError::Serialization(format!("user roles column: {e}")))?,
            };
            tables.next_user_id = tables.next_user_id.max(user.id + 1);
            tables.users.insert(user.id, user);
        }

        let rows = sqlx::query(
            "SELECT user_id, menu_item_id, quantity, unit_price_minor, price_minor \
             FROM cart_lines ORDER BY user_id, menu_item_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_err("postgres load cart lines failed", e))?;
        for row in rows {
            let quantity: i64 = row
                .try_get("quantity")
                .map_err(|e| storage_err("decode cart line", e))?;
            let unit: i64 = row
                .try_get("unit_price_minor")
                .map_err(|e| storage_err("decode cart line", e))?;
            let price: i64 = row
                .try_get("price_minor")
                .map_err(|e| storage_err("decode cart line", e))?;
            let line = CartLine {
                user_id: row
                    .try_get("user_id")
                    .map_err(|e| storage_err("decode cart line", e))?,
                menu_item_id: row
                    .try_get("menu_item_id")
                    .map_err(|e| storage_err("decode cart line", e))?,
                quantity: u32::try_from(quantity)
                    .map_err(|_| BistroError::Storage("cart quantity out of range".to_string()))?,
                unit_price_minor: from_db_amount(unit, "cart unit price")?,
                price_minor: from_db_amount(price, "cart price")?,
            };
            tables
                .cart_lines
                .insert((line.user_id, line.menu_item_id), line);
        }

        let rows = sqlx::query(
            "SELECT id, user_id, delivery_crew_id, status, total_minor, placed_at \
             FROM orders ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_err("postgres load orders failed", e))?;
        for row in rows {
            let status: String = row
                .try_get("status")
                .map_err(|e| storage_err("decode order", e))?;
            let total: i64 = row
                .try_get("total_minor")
                .map_err(|e| storage_err("decode order", e))?;
            let order = Order {
                id: row.try_get("id").map_err(|e| storage_err("decode order", e))?,
                user_id: row
                    .try_get("user_id")
                    .map_err(|e| storage_err("decode order", e))?,
                delivery_crew_id: row
                    .try_get("delivery_crew_id")
                    .map_err(|e| storage_err("decode order", e))?,
                status: OrderStatus::parse(&status).ok_or_else(|| {
                    BistroError::Storage(format!("unknown order status '{status}' in postgres"))
                })?,
                total_minor: from_db_amount(total, "order total")?,
                placed_at: row
                    .try_get("placed_at")
                    .map_err(|e| storage_err("decode order", e))?,
                items: Vec::new(),
            };
            tables.next_order_id = tables.next_order_id.max(order.id + 1);
            tables.orders.insert(order.id, order);
        }

        let rows = sqlx::query(
            "SELECT id, order_id, menu_item_id, quantity, unit_price_minor, price_minor \
             FROM order_items ORDER BY order_id, id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_err("postgres load order items failed", e))?;
        for row in rows {
            let quantity: i64 = row
                .try_get("quantity")
                .map_err(|e| storage_err("decode order item", e))?;
            let unit: i64 = row
                .try_get("unit_price_minor")
                .map_err(|e| storage_err("decode order item", e))?;
            let price: i64 = row
                .try_get("price_minor")
                .map_err(|e| storage_err("decode order item", e))?;
            let item = OrderItem {
                id: row.try_get("id").map_err(|e| storage_err("decode order item", e))?,
                order_id: row
                    .try_get("order_id")
                    .map_err(|e| storage_err("decode order item", e))?,
                menu_item_id: row
                    .try_get("menu_item_id")
                    .map_err(|e| storage_err("decode order item", e))?,
                quantity: u32::try_from(quantity).map_err(|_| {
                    BistroError::Storage("order item quantity out of range".to_string())
                })?,
                unit_price_minor: from_db_amount(unit, "order item unit price")?,
                price_minor: from_db_amount(price, "order item price")?,
            };
            tables.next_order_item_id = tables.next_order_item_id.max(item.id + 1);
            if let Some(order) = tables.orders.get_mut(&item.order_id) {
                order.items.push(item);
            }
        }

        Ok(tables)
    }

    async fn insert_category(&self, category: &Category) -> Result<(), BistroError> {
        sqlx::query("INSERT INTO categories (id, slug, title) VALUES ($1, $2, $3)")
            .bind(category.id)
            .bind(&category.slug)
            .bind(&category.title)
            .execute(&self.pool)
            .await
            .map_err(|e| storage_err("postgres insert category failed", e))?;
        Ok(())
    }

    async fn insert_menu_item(&self, item: &MenuItem) -> Result<(), BistroError> {
        sqlx::query(
            "INSERT INTO menu_items (id, title, price_minor, featured, category_id) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(item.id)
        .bind(&item.title)
        .bind(to_db_amount(item.price_minor, "menu item price")?)
        .bind(item.featured)
        .bind(item.category_id)
        .execute(&self.pool)
        .await
        .map_err(|e| storage_err("postgres insert menu item failed", e))?;
        Ok(())
    }

    async fn update_menu_item(&self, item: &MenuItem) -> Result<(), BistroError> {
        sqlx::query(
            "UPDATE menu_items SET title = $2, price_minor = $3, featured = $4, category_id = $5 \
             WHERE id = $1",
        )
        .bind(item.id)
        .bind(&item.title)
        .bind(to_db_amount(item.price_minor, "menu item price")?)
        .bind(item.featured)
        .bind(item.category_id)
        .execute(&self.pool)
        .await
        .map_err(|e| storage_err("postgres update menu item failed", e))?;
        Ok(())
    }

    async fn delete_menu_item(&self, id: i64) -> Result<(), BistroError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| storage_err("postgres begin failed", e))?;
        sqlx::query("DELETE FROM cart_lines WHERE menu_item_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| storage_err("postgres delete cart lines failed", e))?;
        sqlx::query("DELETE FROM menu_items WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| storage_err("postgres delete menu item failed", e))?;
        tx.commit()
            .await
            .map_err(|e| storage_err("postgres commit failed", e))
    }

    async fn insert_user(&self, user: &UserAccount) -> Result<(), BistroError> {
        let roles = serde_json::to_value(&user.roles)
            .map_err(|e| BistroError::Serialization(e.to_string()))?;
        sqlx::query("INSERT INTO users (id, username, superuser, roles) VALUES ($1, $2, $3, $4)")
            .bind(user.id)
            .bind(&user.username)
            .bind(user.superuser)
            .bind(roles)
            .execute(&self.pool)
            .await
            .map_err(|e| storage_err("postgres insert user failed", e))?;
        Ok(())
    }

    async fn update_user_roles(&self, user: &UserAccount) -> Result<(), BistroError> {
        let roles = serde_json::to_value(&user.roles)
            .map_err(|e| BistroError::Serialization(e.to_string()))?;
        sqlx::query("UPDATE users SET roles = $2 WHERE id = $1")
            .bind(user.id)
            .bind(roles)
            .execute(&self.pool)
            .await
            .map_err(|e| storage_err("postgres update user roles failed", e))?;
        Ok(())
    }

    async fn upsert_cart_line(&self, line: &CartLine) -> Result<(), BistroError> {
        sqlx::query(
            "INSERT INTO cart_lines (user_id, menu_item_id, quantity, unit_price_minor, price_minor) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (user_id, menu_item_id) DO UPDATE \
             SET quantity = EXCLUDED.quantity, \
                 unit_price_minor = EXCLUDED.unit_price_minor, \
                 price_minor = EXCLUDED.price_minor",
        )
        .bind(line.user_id)
        .bind(line.menu_item_id)
        .bind(i64::from(line.quantity))
        .bind(to_db_amount(line.unit_price_minor, "cart unit price")?)
        .bind(to_db_amount(line.price_minor, "cart price")?)
        .execute(&self.pool)
        .await
        .map_err(|e| storage_err("postgres upsert cart line failed", e))?;
        Ok(())
    }

    async fn clear_cart(&self, user_id: i64) -> Result<(), BistroError> {
        sqlx::query("DELETE FROM cart_lines WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| storage_err("postgres clear cart failed", e))?;
        Ok(())
    }

    /// The relational half of the cart -> order conversion: order row, item
    /// rows, and cart deletion commit or roll back together.
    async fn insert_order_and_clear_cart(&self, order: &Order) -> Result<(), BistroError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| storage_err("postgres begin failed", e))?;
        sqlx::query(
            "INSERT INTO orders (id, user_id, delivery_crew_id, status, total_minor, placed_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(order.id)
        .bind(order.user_id)
        .bind(order.delivery_crew_id)
        .bind(order.status.as_str())
        .bind(to_db_amount(order.total_minor, "order total")?)
        .bind(order.placed_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| storage_err("postgres insert order failed", e))?;

        for item in &order.items {
            sqlx::query(
                "INSERT INTO order_items \
                 (id, order_id, menu_item_id, quantity, unit_price_minor, price_minor) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(item.id)
            .bind(item.order_id)
            .bind(item.menu_item_id)
            .bind(i64::from(item.quantity))
            .bind(to_db_amount(item.unit_price_minor, "order item unit price")?)
            .bind(to_db_amount(item.price_minor, "order item price")?)
            .execute(&mut *tx)
            .await
            .map_err(|e| storage_err("postgres insert order item failed", e))?;
        }

        sqlx::query("DELETE FROM cart_lines WHERE user_id = $1")
            .bind(order.user_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| storage_err("postgres clear cart failed", e))?;

        tx.commit()
            .await
            .map_err(|e| storage_err("postgres commit failed", e))
    }

    async fn update_order(&self, order: &Order) -> Result<(), BistroError> {
        sqlx::query("UPDATE orders SET delivery_crew_id = $2, status = $3 WHERE id = $1")
            .bind(order.id)
            .bind(order.delivery_crew_id)
            .bind(order.status.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| storage_err("postgres update order failed", e))?;
        Ok(())
    }

    async fn delete_order(&self, id: i64) -> Result<(), BistroError> {
        // order_items go with the order via ON DELETE CASCADE.
        sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| storage_err("postgres delete order failed", e))?;
        Ok(())
    }
}
