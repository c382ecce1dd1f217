use crate::error::BistroError;
use crate::storage::Store;
use crate::types::Role;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Result of a membership change, echoed back to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct GroupUpdate {
    pub username: String,
    pub group: &'static str,
    /// False when the change was already in place (idempotent add/remove).
    pub changed: bool,
}

/// Assigns and revokes the manager/delivery-crew roles on user accounts.
/// Groups are the finite [`Role`] enum; there is nothing to create or delete.
/// The manager-or-superuser gate runs in the engine before calls land here.
pub struct GroupService {
    store: Arc<Store>,
}

impl GroupService {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    fn resolve_group(group_name: &str) -> Result<Role, BistroError> {
        Role::from_group_name(group_name)
            .ok_or_else(|| BistroError::not_found("Group not found."))
    }

    /// Idempotent add: granting a role twice is success, not an error.
    pub async fn add_member(
        &self,
        group_name: &str,
        username: &str,
    ) -> Result<GroupUpdate, BistroError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(BistroError::validation("Username is required."));
        }
        let user = self
            .store
            .user_by_username(username)
            .await
            .ok_or_else(|| BistroError::not_found("User not found."))?;
        let role = Self::resolve_group(group_name)?;

        let mut roles = user.roles.clone();
        let changed = roles.insert(role);
        if changed {
            self.store.update_user_roles(user.id, roles).await?;
            info!(user_id = user.id, group = role.group_name(), "group member added");
        }
        Ok(GroupUpdate {
            username: user.username,
            group: role.group_name(),
            changed,
        })
    }

    /// Removal mirrors add, addressed by user id rather than username.
    pub async fn remove_member(
        &self,
        group_name: &str,
        user_id: i64,
    ) -> Result<GroupUpdate, BistroError> {
        let user = self
            .store
            .user(user_id)
            .await
            .ok_or_else(|| BistroError::not_found("User not found."))?;
        let role = Self::resolve_group(group_name)?;

        let mut roles = user.roles.clone();
        let changed = roles.remove(role);
        if changed {
            self.store.update_user_roles(user.id, roles).await?;
            info!(user_id = user.id, group = role.group_name(), "group member removed");
        }
        Ok(GroupUpdate {
            username: user.username,
            group: role.group_name(),
            changed,
        })
    }

    /// Usernames currently holding the group's role.
    pub async fn members(&self, group_name: &str) -> Result<Vec<String>, BistroError> {
        let role = Self::resolve_group(group_name)?;
        Ok(self
            .store
            .users()
            .await
            .into_iter()
            .filter(|user| user.roles.contains(role))
            .map(|user| user.username)
            .collect())
    }
}
