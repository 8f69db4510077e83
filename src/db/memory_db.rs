use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use dashmap::DashMap;
use time::OffsetDateTime;
use uuid::Uuid;

use super::request_repository::RequestRepository;
use super::template_repository::TemplateStore;
use super::RepositoryError;
use crate::models::request::{RequestInstance, RequestStatus};
use crate::models::template::{TemplateDraft, WorkflowTemplate};

/// Process-local template store keeping every version.
#[derive(Default)]
pub struct InMemoryTemplateStore {
    versions: RwLock<HashMap<Uuid, Vec<WorkflowTemplate>>>,
}

impl InMemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> RepositoryError {
        RepositoryError::Unavailable("template store lock poisoned".into())
    }
}

#[async_trait]
impl TemplateStore for InMemoryTemplateStore {
    async fn get_template(
        &self,
        template_id: Uuid,
    ) -> Result<Option<WorkflowTemplate>, RepositoryError> {
        let versions = self.versions.read().map_err(|_| Self::poisoned())?;
        Ok(versions
            .get(&template_id)
            .and_then(|list| list.last())
            .cloned())
    }

    async fn get_template_version(
        &self,
        template_id: Uuid,
        version: u32,
    ) -> Result<Option<WorkflowTemplate>, RepositoryError> {
        let versions = self.versions.read().map_err(|_| Self::poisoned())?;
        Ok(versions
            .get(&template_id)
            .and_then(|list| list.iter().find(|t| t.version == version))
            .cloned())
    }

    async fn save_template(&self, draft: TemplateDraft) -> Result<WorkflowTemplate, RepositoryError> {
        let mut versions = self.versions.write().map_err(|_| Self::poisoned())?;
        let id = draft.id.unwrap_or_else(Uuid::new_v4);
        let list = versions.entry(id).or_default();
        let version = list.iter().map(|t| t.version).max().unwrap_or(0) + 1;
        let template = draft.into_template(id, version, OffsetDateTime::now_utc());
        list.push(template.clone());
        Ok(template)
    }

    async fn list_templates(&self) -> Result<Vec<WorkflowTemplate>, RepositoryError> {
        let versions = self.versions.read().map_err(|_| Self::poisoned())?;
        let mut latest: Vec<WorkflowTemplate> = versions
            .values()
            .filter_map(|list| list.last().cloned())
            .collect();
        latest.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(latest)
    }

    async fn delete_template_version(
        &self,
        template_id: Uuid,
        version: u32,
    ) -> Result<bool, RepositoryError> {
        let mut versions = self.versions.write().map_err(|_| Self::poisoned())?;
        let Some(list) = versions.get_mut(&template_id) else {
            return Ok(false);
        };
        let before = list.len();
        list.retain(|t| t.version != version);
        let removed = list.len() != before;
        if list.is_empty() {
            versions.remove(&template_id);
        }
        Ok(removed)
    }
}

#[derive(Default)]
pub struct InMemoryRequestRepository {
    requests: DashMap<Uuid, RequestInstance>,
}

impl InMemoryRequestRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RequestRepository for InMemoryRequestRepository {
    async fn insert_request(&self, instance: RequestInstance) -> Result<(), RepositoryError> {
        if self.requests.contains_key(&instance.id) {
            return Err(RepositoryError::Conflict(instance.id));
        }
        self.requests.insert(instance.id, instance);
        Ok(())
    }

    async fn find_request(
        &self,
        instance_id: Uuid,
    ) -> Result<Option<RequestInstance>, RepositoryError> {
        Ok(self.requests.get(&instance_id).map(|r| r.value().clone()))
    }

    async fn update_request(&self, instance: &RequestInstance) -> Result<(), RepositoryError> {
        match self.requests.get_mut(&instance.id) {
            Some(mut entry) => {
                *entry = instance.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound(instance.id)),
        }
    }

    async fn list_in_progress(&self) -> Result<Vec<Uuid>, RepositoryError> {
        let mut open: Vec<(OffsetDateTime, Uuid)> = self
            .requests
            .iter()
            .filter(|r| r.status == RequestStatus::InProgress)
            .map(|r| (r.created_at, r.id))
            .collect();
        open.sort();
        Ok(open.into_iter().map(|(_, id)| id).collect())
    }
}
