use async_trait::async_trait;
use uuid::Uuid;

use super::RepositoryError;
use crate::models::request::RequestInstance;

#[async_trait]
pub trait RequestRepository: Send + Sync {
    async fn insert_request(&self, instance: RequestInstance) -> Result<(), RepositoryError>;

    async fn find_request(&self, instance_id: Uuid)
        -> Result<Option<RequestInstance>, RepositoryError>;

    async fn update_request(&self, instance: &RequestInstance) -> Result<(), RepositoryError>;

    /// Ids of every instance still `in_progress`, oldest first.
    async fn list_in_progress(&self) -> Result<Vec<Uuid>, RepositoryError>;
}
