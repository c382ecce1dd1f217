//! Restaurant ordering core.
//!
//! This crate owns the menu catalog, per-user cart ledgers, the atomic
//! cart-to-order conversion, and the role-gated order update pathway. Every
//! inbound action is authorized by a single deterministic policy table before
//! it reaches a component; credential validation happens upstream and the core
//! only ever sees an identity plus its resolved role set.

#![deny(unsafe_code)]

pub mod cart;
pub mod catalog;
pub mod engine;
pub mod error;
pub mod groups;
pub mod orders;
pub mod policy;
pub mod storage;
pub mod types;

pub use cart::{CartAdd, CartLedger, ClearOutcome};
pub use catalog::{
    CatalogStore, CategoryInput, MenuItemFilter, MenuItemInput, MenuItemPatch, MenuItemSort,
};
pub use engine::{BistroEngine, EngineConfig};
pub use error::BistroError;
pub use groups::{GroupService, GroupUpdate};
pub use orders::{OrderEngine, OrderFilter, OrderPatch, OrderSort};
pub use policy::{AccessPolicy, Action, OrderScope};
pub use storage::{StorageConfig, Store};
pub use types::{
    CartLine, Category, MenuItem, Order, OrderItem, OrderStatus, Role, RoleSet, UserAccount,
};
