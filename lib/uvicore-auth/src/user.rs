use serde::{Deserialize, Serialize};

/// The permission granting every other permission.
pub const ADMIN_PERMISSION: &str = "admin";

/// An authenticated (or anonymous) user with flattened authorization.
///
/// Groups, roles and permissions are sorted and unique.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: i64,
    pub uuid: String,
    /// Subject claim, the user's uuid.
    pub sub: String,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub title: String,
    pub avatar: String,
    pub groups: Vec<String>,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub superadmin: bool,
    pub authenticated: bool,
}

impl UserInfo {
    pub fn name(&self) -> String {
        match (self.first_name.is_empty(), self.last_name.is_empty()) {
            (false, false) => format!("{} {}", self.first_name, self.last_name),
            (false, true) => self.first_name.clone(),
            (true, false) => self.last_name.clone(),
            (true, true) => self.username.clone(),
        }
    }

    /// Whether the user holds `permission`. Superadmins hold all of them.
    pub fn can(&self, permission: &str) -> bool {
        self.superadmin || self.permissions.iter().any(|p| p == permission)
    }

    pub fn can_all(&self, permissions: &[&str]) -> bool {
        permissions.iter().all(|p| self.can(p))
    }

    pub fn can_any(&self, permissions: &[&str]) -> bool {
        permissions.iter().any(|p| self.can(p))
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}
