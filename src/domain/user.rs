// src/domain/user.rs
//
// Requesters, as seen by the queue and the rate limiter

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Regular,
    Patron,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Regular => "regular",
            Role::Patron => "patron",
            Role::Admin => "admin",
        }
    }

    /// Unknown roles degrade to `Regular`
    pub fn parse(value: &str) -> Self {
        match value {
            "patron" => Role::Patron,
            "admin" => Role::Admin,
            _ => Role::Regular,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Platform user id
    pub id: String,
    pub name: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role: Role::Regular,
            created_at: Utc::now(),
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    /// Privileged roles come from configuration
    pub fn is_privileged(&self, privileged_roles: &[String]) -> bool {
        privileged_roles.iter().any(|r| r == self.role.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_privilege_follows_config() {
        let roles = vec!["admin".to_string(), "patron".to_string()];
        assert!(!User::new("1", "a").is_privileged(&roles));
        assert!(User::new("1", "a").with_role(Role::Patron).is_privileged(&roles));
        assert_eq!(Role::parse("wizard"), Role::Regular);
    }
}
