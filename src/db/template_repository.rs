use async_trait::async_trait;
use uuid::Uuid;

use super::RepositoryError;
use crate::models::template::{TemplateDraft, WorkflowTemplate};

/// Versioned template storage. Saved versions never change; saving an
/// existing template id appends a new version.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    /// Latest version of the template.
    async fn get_template(&self, template_id: Uuid)
        -> Result<Option<WorkflowTemplate>, RepositoryError>;

    async fn get_template_version(
        &self,
        template_id: Uuid,
        version: u32,
    ) -> Result<Option<WorkflowTemplate>, RepositoryError>;

    async fn save_template(&self, draft: TemplateDraft) -> Result<WorkflowTemplate, RepositoryError>;

    /// Latest version of every template.
    async fn list_templates(&self) -> Result<Vec<WorkflowTemplate>, RepositoryError>;

    async fn delete_template_version(
        &self,
        template_id: Uuid,
        version: u32,
    ) -> Result<bool, RepositoryError>;
}
