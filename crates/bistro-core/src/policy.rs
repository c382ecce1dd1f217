use crate::error::BistroError;
use crate::types::{Order, UserAccount};

/// Action classes subject to authorization.
///
/// Every engine entrypoint names its action here and runs it through
/// [`AccessPolicy`] before touching any component, so the capability matrix
/// lives in exactly one place instead of being re-derived per handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Browse categories or menu items. Open to anonymous callers.
    MenuRead,
    /// Create, update or delete menu items and categories.
    MenuWrite,
    /// Read or mutate the cart owned by `owner`.
    CartAccess { owner: i64 },
    /// Convert the caller's cart into an order.
    OrderPlace,
    /// List or fetch orders (visibility is scoped separately).
    OrderRead,
    /// Update status/assignment fields on an order.
    OrderMutate,
    /// Remove an order and its items.
    OrderDelete,
    /// Add or remove group members.
    GroupManage,
    /// List the members of a group.
    GroupList,
}

/// Which orders an actor is allowed to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderScope {
    All,
    AssignedTo(i64),
    OwnedBy(i64),
}

impl OrderScope {
    pub fn permits(&self, order: &Order) -> bool {
        match self {
            Self::All => true,
            Self::AssignedTo(user_id) => order.delivery_crew_id == Some(*user_id),
            Self::OwnedBy(user_id) => order.user_id == *user_id,
        }
    }
}

/// Deterministic role-based authorization table.
///
/// Pure functions over an already-resolved identity and role set; no storage
/// access and no side effects, so the same input always yields the same
/// decision.
pub struct AccessPolicy;

impl AccessPolicy {
    /// Reject anonymous callers for actions that require an identity.
    pub fn authenticate(actor: Option<&UserAccount>) -> Result<&UserAccount, BistroError> {
        actor.ok_or_else(|| BistroError::forbidden("Authentication required."))
    }

    pub fn authorize(actor: Option<&UserAccount>, action: Action) -> Result<(), BistroError> {
        match action {
            Action::MenuRead => Ok(()),

            Action::MenuWrite => {
                let actor = Self::authenticate(actor)?;
                if actor.roles.is_manager() {
                    Ok(())
                } else {
                    Err(BistroError::forbidden(
                        "Forbidden. Only managers can manage the menu.",
                    ))
                }
            }

            Action::CartAccess { owner } => {
                let actor = Self::authenticate(actor)?;
                if actor.id == owner {
                    Ok(())
                } else {
                    Err(BistroError::forbidden(
                        "Forbidden. You may only access your own cart.",
                    ))
                }
            }

            Action::OrderPlace | Action::OrderRead => {
                Self::authenticate(actor).map(|_| ())
            }

            Action::OrderMutate => {
                let actor = Self::authenticate(actor)?;
                if actor.roles.is_manager() || actor.roles.is_delivery_crew() {
                    Ok(())
                } else {
                    Err(BistroError::forbidden(
                        "Forbidden. You cannot update this order.",
                    ))
                }
            }

            Action::OrderDelete => {
                let actor = Self::authenticate(actor)?;
                if actor.roles.is_manager() {
                    Ok(())
                } else {
                    Err(BistroError::forbidden(
                        "Forbidden. Only managers can delete orders.",
                    ))
                }
            }

            Action::GroupManage => {
                let actor = Self::authenticate(actor)?;
                if actor.roles.is_manager() || actor.superuser {
                    Ok(())
                } else {
                    Err(BistroError::forbidden(
                        "Forbidden. Only managers can perform this action.",
                    ))
                }
            }

            Action::GroupList => {
                let actor = Self::authenticate(actor)?;
                if actor.roles.is_manager() {
                    Ok(())
                } else {
                    Err(BistroError::forbidden(
                        "Forbidden. Only managers can perform this action.",
                    ))
                }
            }
        }
    }

    /// Order visibility: managers see everything, delivery crew see their
    /// assignments, everyone else sees only their own orders.
    pub fn order_scope(actor: &UserAccount) -> OrderScope {
        if actor.roles.is_manager() {
            OrderScope::All
        } else if actor.roles.is_delivery_crew() {
            OrderScope::AssignedTo(actor.id)
        } else {
            OrderScope::OwnedBy(actor.id)
        }
    }
}
