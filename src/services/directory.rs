use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::escalation::EscalationTargetType;

/// Delivery details for one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub user_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub telegram_chat_id: Option<String>,
    #[serde(default)]
    pub push_token: Option<String>,
}

impl Contact {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            display_name: user_id.to_string(),
            email: None,
            phone: None,
            telegram_chat_id: None,
            push_token: None,
        }
    }

    pub fn with_email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    Role,
    Department,
    Position,
}

impl GroupKind {
    /// Group kind behind an escalation target; `None` for single users.
    pub fn for_target(target_type: EscalationTargetType) -> Option<Self> {
        match target_type {
            EscalationTargetType::User => None,
            EscalationTargetType::Role => Some(GroupKind::Role),
            EscalationTargetType::Department => Some(GroupKind::Department),
            EscalationTargetType::Position => Some(GroupKind::Position),
        }
    }
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Directory: Send + Sync {
    async fn contact(&self, user_id: &str) -> Result<Option<Contact>, DirectoryError>;

    /// Members of a role, department or position, in directory order.
    async fn group_members(&self, kind: GroupKind, name: &str)
        -> Result<Vec<String>, DirectoryError>;

    async fn search_users(&self, query: &str) -> Result<Vec<Contact>, DirectoryError>;
}

/// Snapshot of users and groups loaded at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectorySeed {
    #[serde(default)]
    pub users: Vec<Contact>,
    #[serde(default)]
    pub groups: Vec<GroupSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSeed {
    pub kind: GroupKind,
    pub name: String,
    #[serde(default)]
    pub members: Vec<String>,
}

#[derive(Default)]
pub struct InMemoryDirectory {
    users: RwLock<Vec<Contact>>,
    groups: RwLock<HashMap<(GroupKind, String), Vec<String>>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(self, contact: Contact) -> Self {
        if let Ok(mut users) = self.users.write() {
            users.retain(|u| u.user_id != contact.user_id);
            users.push(contact);
        }
        self
    }

    pub fn with_member(self, kind: GroupKind, group: &str, user_id: &str) -> Self {
        if let Ok(mut groups) = self.groups.write() {
            let members = groups.entry((kind, group.to_string())).or_default();
            if !members.iter().any(|m| m == user_id) {
                members.push(user_id.to_string());
            }
        }
        self
    }

    pub fn from_seed(seed: DirectorySeed) -> Self {
        let directory = seed.users.into_iter().fold(Self::new(), Self::with_user);
        seed.groups.iter().fold(directory, |dir, group| {
            group
                .members
                .iter()
                .fold(dir, |dir, member| dir.with_member(group.kind, &group.name, member))
        })
    }

    fn poisoned() -> DirectoryError {
        DirectoryError::Unavailable("directory lock poisoned".into())
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn contact(&self, user_id: &str) -> Result<Option<Contact>, DirectoryError> {
        let users = self.users.read().map_err(|_| Self::poisoned())?;
        Ok(users.iter().find(|u| u.user_id == user_id).cloned())
    }

    async fn group_members(
        &self,
        kind: GroupKind,
        name: &str,
    ) -> Result<Vec<String>, DirectoryError> {
        let groups = self.groups.read().map_err(|_| Self::poisoned())?;
        Ok(groups
            .get(&(kind, name.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn search_users(&self, query: &str) -> Result<Vec<Contact>, DirectoryError> {
        let needle = query.trim().to_lowercase();
        let users = self.users.read().map_err(|_| Self::poisoned())?;
        Ok(users
            .iter()
            .filter(|u| {
                needle.is_empty()
                    || u.user_id.to_lowercase().contains(&needle)
                    || u.display_name.to_lowercase().contains(&needle)
                    || u
                        .email
                        .as_deref()
                        .map(|e| e.to_lowercase().contains(&needle))
                        .unwrap_or(false)
            })
            .cloned()
            .collect())
    }
}
