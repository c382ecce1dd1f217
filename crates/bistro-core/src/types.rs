use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Roles a user account can hold. Absence of both means the account is a
/// plain customer; there is no Customer variant on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Manager,
    DeliveryCrew,
}

impl Role {
    /// Resolve a role from a group route segment. Accepts the kebab-case
    /// segment as well as the display spelling used by the seed data.
    pub fn from_group_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().replace([' ', '_'], "-").as_str() {
            "manager" | "managers" => Some(Self::Manager),
            "delivery-crew" => Some(Self::DeliveryCrew),
            _ => None,
        }
    }

    pub fn group_name(&self) -> &'static str {
        match self {
            Self::Manager => "Manager",
            Self::DeliveryCrew => "Delivery Crew",
        }
    }
}

/// The set of roles resolved once per identity, consulted by the access
/// policy without touching storage again.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSet(BTreeSet<Role>);

impl RoleSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn of(roles: impl IntoIterator<Item = Role>) -> Self {
        Self(roles.into_iter().collect())
    }

    pub fn contains(&self, role: Role) -> bool {
        self.0.contains(&role)
    }

    pub fn is_manager(&self) -> bool {
        self.contains(Role::Manager)
    }

    pub fn is_delivery_crew(&self) -> bool {
        self.contains(Role::DeliveryCrew)
    }

    /// Returns true if the role was not already present.
    pub fn insert(&mut self, role: Role) -> bool {
        self.0.insert(role)
    }

    /// Returns true if the role was present.
    pub fn remove(&mut self, role: Role) -> bool {
        self.0.remove(&role)
    }

    pub fn iter(&self) -> impl Iterator<Item = Role> + '_ {
        self.0.iter().copied()
    }
}

/// A user account as seen by the core: an upstream-authenticated identity
/// plus its resolved role set. Credential handling lives upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: i64,
    pub username: String,
    pub superuser: bool,
    pub roles: RoleSet,
}

/// Menu category. Immutable after creation; referenced by menu items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub slug: String,
    pub title: String,
}

/// A sellable menu item. Prices are carried in minor units (cents).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuItem {
    pub id: i64,
    pub title: String,
    pub price_minor: u64,
    pub featured: bool,
    pub category_id: i64,
}

/// One line of a user's cart, unique per (user, menu item).
///
/// Invariant: price_minor == unit_price_minor * quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub user_id: i64,
    pub menu_item_id: i64,
    pub quantity: u32,
    pub unit_price_minor: u64,
    pub price_minor: u64,
}

/// Order lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    OutForDelivery,
    Delivered,
}

impl OrderStatus {
    pub fn code(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::OutForDelivery => 1,
            Self::Delivered => 2,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(Self::Pending),
            1 => Some(Self::OutForDelivery),
            2 => Some(Self::Delivered),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::OutForDelivery => "out_for_delivery",
            Self::Delivered => "delivered",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        if let Ok(code) = value.parse::<u64>() {
            return Self::from_code(code);
        }
        match value {
            "pending" => Some(Self::Pending),
            "out_for_delivery" => Some(Self::OutForDelivery),
            "delivered" => Some(Self::Delivered),
            _ => None,
        }
    }
}

// Inbound payloads may carry the snake_case name or the legacy numeric flag
// (0 = pending, 1 = out for delivery, 2 = delivered).
impl<'de> Deserialize<'de> for OrderStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct StatusVisitor;

        impl serde::de::Visitor<'_> for StatusVisitor {
            type Value = OrderStatus;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an order status name or numeric code")
            }

            fn visit_u64<E: serde::de::Error>(self, value: u64) -> Result<Self::Value, E> {
                OrderStatus::from_code(value)
                    .ok_or_else(|| E::custom(format!("unknown order status code {value}")))
            }

            fn visit_i64<E: serde::de::Error>(self, value: i64) -> Result<Self::Value, E> {
                u64::try_from(value)
                    .ok()
                    .and_then(OrderStatus::from_code)
                    .ok_or_else(|| E::custom(format!("unknown order status code {value}")))
            }

            fn visit_str<E: serde::de::Error>(self, value: &str) -> Result<Self::Value, E> {
                OrderStatus::parse(value)
                    .ok_or_else(|| E::custom(format!("unknown order status '{value}'")))
            }
        }

        deserializer.deserialize_any(StatusVisitor)
    }
}

/// Immutable snapshot of one cart line at placement time. Never recomputed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: i64,
    pub order_id: i64,
    pub menu_item_id: i64,
    pub quantity: u32,
    pub unit_price_minor: u64,
    pub price_minor: u64,
}

/// A placed order. `user_id`, `total_minor`, `placed_at` and `items` are
/// immutable after creation; `status` and `delivery_crew_id` change only
/// through the order engine's update pathway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub user_id: i64,
    pub delivery_crew_id: Option<i64>,
    pub status: OrderStatus,
    pub total_minor: u64,
    pub placed_at: DateTime<Utc>,
    pub items: Vec<OrderItem>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_names_resolve_both_spellings() {
        assert_eq!(Role::from_group_name("manager"), Some(Role::Manager));
        assert_eq!(Role::from_group_name("Manager"), Some(Role::Manager));
        assert_eq!(
            Role::from_group_name("delivery-crew"),
            Some(Role::DeliveryCrew)
        );
        assert_eq!(
            Role::from_group_name("Delivery Crew"),
            Some(Role::DeliveryCrew)
        );
        assert_eq!(Role::from_group_name("admins"), None);
    }

    #[test]
    fn role_set_insert_is_idempotent() {
        let mut roles = RoleSet::empty();
        assert!(roles.insert(Role::Manager));
        assert!(!roles.insert(Role::Manager));
        assert!(roles.is_manager());
        assert!(!roles.is_delivery_crew());
    }

    #[test]
    fn order_status_accepts_numeric_and_named_forms() {
        let named: OrderStatus = serde_json::from_str("\"out_for_delivery\"").unwrap();
        assert_eq!(named, OrderStatus::OutForDelivery);

        let numeric: OrderStatus = serde_json::from_str("1").unwrap();
        assert_eq!(numeric, OrderStatus::OutForDelivery);

        let stringly: OrderStatus = serde_json::from_str("\"2\"").unwrap();
        assert_eq!(stringly, OrderStatus::Delivered);

        assert!(serde_json::from_str::<OrderStatus>("7").is_err());
    }

    #[test]
    fn order_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&OrderStatus::OutForDelivery).unwrap(),
            "\"out_for_delivery\""
        );
    }
}
