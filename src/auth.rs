use crate::config::SoftDeleteConfig;
use crate::core::{DbError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;

/// Permissions on the bookkeeping models, plus the undelete action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    AddChangeSet,
    ChangeChangeSet,
    DeleteChangeSet,
    AddSoftDeleteRecord,
    ChangeSoftDeleteRecord,
    DeleteSoftDeleteRecord,
    /// Undelete a ChangeSet from the admin surface
    CanUndelete,
    /// Administrative privileges
    Admin,
}

impl Permission {
    /// Everything an undelete operator needs; granted by `assign_permissions`.
    pub const SOFTDELETE: [Permission; 7] = [
        Permission::AddChangeSet,
        Permission::ChangeChangeSet,
        Permission::DeleteChangeSet,
        Permission::AddSoftDeleteRecord,
        Permission::ChangeSoftDeleteRecord,
        Permission::DeleteSoftDeleteRecord,
        Permission::CanUndelete,
    ];
}

/// Who receives permissions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grantee<'a> {
    User(&'a str),
    Group(&'a str),
}

/// User account
#[derive(Debug, Clone)]
pub struct User {
    username: String,
    password_hash: String,
    permissions: Vec<Permission>,
    groups: Vec<String>,
}

impl User {
    pub fn new(username: String, password_hash: String, permissions: Vec<Permission>) -> Self {
        Self {
            username,
            password_hash,
            permissions,
            groups: Vec::new(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Permissions granted to the user directly; group grants are resolved
    /// by [`AuthManager::check`]
    pub fn permissions(&self) -> &[Permission] {
        &self.permissions
    }

    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    /// Checks a direct grant; Admin implies every permission
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&Permission::Admin) || self.permissions.contains(&permission)
    }

    #[inline]
    pub fn is_admin(&self) -> bool {
        self.permissions.contains(&Permission::Admin)
    }

    fn add_permission(&mut self, permission: Permission) -> bool {
        if !self.permissions.contains(&permission) {
            self.permissions.push(permission);
            true
        } else {
            false
        }
    }

    fn remove_permission(&mut self, permission: Permission) -> bool {
        let len_before = self.permissions.len();
        self.permissions.retain(|p| p != &permission);
        len_before != self.permissions.len()
    }
}

/// Named set of permissions shared by its members
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    name: String,
    permissions: Vec<Permission>,
}

impl Group {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn permissions(&self) -> &[Permission] {
        &self.permissions
    }
}

/// Authentication and authorization manager
///
/// Manages user accounts, groups and their permissions
pub struct AuthManager {
    users: RwLock<HashMap<String, User>>,
    groups: RwLock<HashMap<String, Group>>,
}

impl AuthManager {
    const DEFAULT_ADMIN_USERNAME: &'static str = "admin";
    const DEFAULT_ADMIN_PASSWORD: &'static str = "adminpass";

    /// Creates a new manager with default administrator
    pub fn new() -> Result<Self> {
        Self::with_admin(Self::DEFAULT_ADMIN_USERNAME, Self::DEFAULT_ADMIN_PASSWORD)
    }

    /// Creates a manager with custom administrator credentials
    pub fn with_admin(username: &str, password: &str) -> Result<Self> {
        let mut users = HashMap::new();
        let admin_user = User::new(
            username.to_string(),
            Self::hash_password(password)?,
            vec![Permission::Admin],
        );
        users.insert(username.to_string(), admin_user);

        Ok(Self {
            users: RwLock::new(users),
            groups: RwLock::new(HashMap::new()),
        })
    }

    /// Hashes a password using bcrypt with the default cost factor
    fn hash_password(password: &str) -> Result<String> {
        bcrypt::hash(password, bcrypt::DEFAULT_COST)
            .map_err(|e| DbError::Storage(format!("Failed to hash password: {}", e)))
    }

    fn verify_password(password: &str, hash: &str) -> bool {
        bcrypt::verify(password, hash).unwrap_or(false)
    }

    pub async fn authenticate(&self, username: &str, password: &str) -> Result<User> {
        let users = self.users.read().await;

        let user = users
            .get(username)
            .ok_or_else(|| DbError::PermissionDenied("Invalid username or password".into()))?;

        if !Self::verify_password(password, &user.password_hash) {
            return Err(DbError::PermissionDenied("Invalid username or password".into()));
        }

        Ok(user.clone())
    }

    pub async fn create_user(
        &self,
        username: &str,
        password: &str,
        permissions: Vec<Permission>,
    ) -> Result<()> {
        self.validate_username(username)?;
        self.validate_password(password)?;

        let mut users = self.users.write().await;
        if users.contains_key(username) {
            return Err(DbError::ConstraintViolation(format!(
                "User '{}' already exists",
                username
            )));
        }

        let user = User::new(
            username.to_string(),
            Self::hash_password(password)?,
            permissions,
        );
        users.insert(username.to_string(), user);
        Ok(())
    }

    pub async fn delete_user(&self, username: &str) -> Result<()> {
        let mut users = self.users.write().await;

        let user_to_delete = users
            .get(username)
            .ok_or_else(|| DbError::NotFound(format!("User '{}'", username)))?;

        if user_to_delete.is_admin() {
            let admin_count = users.values().filter(|u| u.is_admin()).count();
            if admin_count <= 1 {
                return Err(DbError::ConstraintViolation(
                    "Cannot delete the last admin user".into(),
                ));
            }
        }

        users.remove(username);
        Ok(())
    }

    pub async fn update_password(&self, username: &str, new_password: &str) -> Result<()> {
        self.validate_password(new_password)?;
        let hash = Self::hash_password(new_password)?;

        let mut users = self.users.write().await;
        let user = users
            .get_mut(username)
            .ok_or_else(|| DbError::NotFound(format!("User '{}'", username)))?;
        user.password_hash = hash;
        Ok(())
    }

    pub async fn grant_permission(&self, username: &str, permission: Permission) -> Result<()> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(username)
            .ok_or_else(|| DbError::NotFound(format!("User '{}'", username)))?;
        user.add_permission(permission);
        Ok(())
    }

    pub async fn revoke_permission(&self, username: &str, permission: Permission) -> Result<()> {
        let mut users = self.users.write().await;

        let is_admin = users
            .get(username)
            .map(User::is_admin)
            .ok_or_else(|| DbError::NotFound(format!("User '{}'", username)))?;

        // Prevent revoking Admin permission from the last administrator
        if permission == Permission::Admin && is_admin {
            let admin_count = users.values().filter(|u| u.is_admin()).count();
            if admin_count <= 1 {
                return Err(DbError::ConstraintViolation(
                    "Cannot revoke admin permission from the last admin user".into(),
                ));
            }
        }

        if let Some(user) = users.get_mut(username) {
            user.remove_permission(permission);
        }
        Ok(())
    }

    pub async fn list_users(&self) -> Vec<String> {
        let users = self.users.read().await;
        let mut usernames: Vec<String> = users.keys().cloned().collect();
        usernames.sort();
        usernames
    }

    pub async fn get_user(&self, username: &str) -> Result<User> {
        let users = self.users.read().await;
        users
            .get(username)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("User '{}'", username)))
    }

    // ========================================================================
    // Groups
    // ========================================================================

    /// Get-or-creates the shared undelete group, with the soft delete
    /// permissions assigned. Does nothing unless the config enables it.
    pub async fn create_group(&self, config: &SoftDeleteConfig) -> Result<Option<String>> {
        if !config.use_softdelete_group {
            return Ok(None);
        }
        let name = config.group_name.clone();
        {
            let mut groups = self.groups.write().await;
            if !groups.contains_key(&name) {
                groups.insert(
                    name.clone(),
                    Group {
                        name: name.clone(),
                        permissions: Vec::new(),
                    },
                );
                info!(group = %name, "group created");
            }
        }
        self.assign_permissions(Grantee::Group(&name)).await?;
        Ok(Some(name))
    }

    pub async fn get_group(&self, name: &str) -> Result<Group> {
        let groups = self.groups.read().await;
        groups
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("Group '{}'", name)))
    }

    pub async fn add_user_to_group(&self, username: &str, group: &str) -> Result<()> {
        if !self.groups.read().await.contains_key(group) {
            return Err(DbError::NotFound(format!("Group '{}'", group)));
        }
        let mut users = self.users.write().await;
        let user = users
            .get_mut(username)
            .ok_or_else(|| DbError::NotFound(format!("User '{}'", username)))?;
        if !user.groups.iter().any(|g| g == group) {
            user.groups.push(group.to_string());
        }
        Ok(())
    }

    /// Grants every soft delete permission to a user or a group.
    pub async fn assign_permissions(&self, grantee: Grantee<'_>) -> Result<()> {
        match grantee {
            Grantee::User(username) => {
                let mut users = self.users.write().await;
                let user = users
                    .get_mut(username)
                    .ok_or_else(|| DbError::NotFound(format!("User '{}'", username)))?;
                for permission in Permission::SOFTDELETE {
                    user.add_permission(permission);
                }
            }
            Grantee::Group(name) => {
                let mut groups = self.groups.write().await;
                let group = groups
                    .get_mut(name)
                    .ok_or_else(|| DbError::NotFound(format!("Group '{}'", name)))?;
                for permission in Permission::SOFTDELETE {
                    if !group.permissions.contains(&permission) {
                        group.permissions.push(permission);
                    }
                }
            }
        }
        Ok(())
    }

    /// Direct grants, Admin, or membership in a group holding the permission.
    pub async fn check(&self, user: &User, permission: Permission) -> Result<()> {
        if user.has_permission(permission) {
            return Ok(());
        }
        let groups = self.groups.read().await;
        let granted = user
            .groups
            .iter()
            .filter_map(|name| groups.get(name))
            .any(|group| group.permissions.contains(&permission));
        if granted {
            Ok(())
        } else {
            Err(DbError::PermissionDenied(format!(
                "User '{}' lacks {:?}",
                user.username, permission
            )))
        }
    }

    fn validate_username(&self, username: &str) -> Result<()> {
        if username.is_empty() {
            return Err(DbError::ConstraintViolation("Username cannot be empty".into()));
        }
        if username.len() > 50 {
            return Err(DbError::ConstraintViolation(
                "Username too long (max 50 characters)".into(),
            ));
        }
        Ok(())
    }

    /// Minimum 8 characters
    fn validate_password(&self, password: &str) -> Result<()> {
        if password.is_empty() {
            return Err(DbError::ConstraintViolation("Password cannot be empty".into()));
        }
        if password.len() < 8 {
            return Err(DbError::ConstraintViolation(
                "Password must be at least 8 characters long".into(),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for AuthManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthManager").finish_non_exhaustive()
    }
}
