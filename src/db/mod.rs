pub mod memory_db;
pub mod request_repository;
pub mod template_repository;

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("record {0} not found")]
    NotFound(Uuid),
    #[error("record {0} already exists")]
    Conflict(Uuid),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}
