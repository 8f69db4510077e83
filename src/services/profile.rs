use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("unknown role `{0}`")]
    UnknownRole(String),
    #[error("unknown profile field `{0}`")]
    UnknownField(String),
    #[error("profile service unavailable: {0}")]
    Unavailable(String),
}

/// User profile collaborator. Role grants are additive only.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProfileService: Send + Sync {
    async fn update_profile_field(
        &self,
        user_id: &str,
        field: &str,
        value: &str,
    ) -> Result<(), ProfileError>;

    async fn grant_role(&self, user_id: &str, role: &str) -> Result<(), ProfileError>;

    async fn roles(&self, user_id: &str) -> Result<BTreeSet<String>, ProfileError>;
}

#[derive(Default)]
pub struct InMemoryProfileService {
    /// When set, granting a role outside this set fails.
    known_roles: Option<BTreeSet<String>>,
    roles: RwLock<HashMap<String, BTreeSet<String>>>,
    fields: RwLock<HashMap<(String, String), String>>,
}

impl InMemoryProfileService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_known_roles(roles: &[&str]) -> Self {
        Self {
            known_roles: Some(roles.iter().map(|r| r.to_string()).collect()),
            ..Self::default()
        }
    }

    pub fn field(&self, user_id: &str, field: &str) -> Option<String> {
        self.fields
            .read()
            .ok()?
            .get(&(user_id.to_string(), field.to_string()))
            .cloned()
    }

    fn poisoned() -> ProfileError {
        ProfileError::Unavailable("profile lock poisoned".into())
    }
}

#[async_trait]
impl ProfileService for InMemoryProfileService {
    async fn update_profile_field(
        &self,
        user_id: &str,
        field: &str,
        value: &str,
    ) -> Result<(), ProfileError> {
        if field.trim().is_empty() {
            return Err(ProfileError::UnknownField(field.to_string()));
        }
        let mut fields = self.fields.write().map_err(|_| Self::poisoned())?;
        fields.insert((user_id.to_string(), field.to_string()), value.to_string());
        Ok(())
    }

    async fn grant_role(&self, user_id: &str, role: &str) -> Result<(), ProfileError> {
        if let Some(known) = &self.known_roles {
            if !known.contains(role) {
                return Err(ProfileError::UnknownRole(role.to_string()));
            }
        }
        let mut roles = self.roles.write().map_err(|_| Self::poisoned())?;
        roles
            .entry(user_id.to_string())
            .or_default()
            .insert(role.to_string());
        Ok(())
    }

    async fn roles(&self, user_id: &str) -> Result<BTreeSet<String>, ProfileError> {
        let roles = self.roles.read().map_err(|_| Self::poisoned())?;
        Ok(roles.get(user_id).cloned().unwrap_or_default())
    }
}
