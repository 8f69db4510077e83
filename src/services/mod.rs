pub mod directory;
pub mod notifications;
pub mod observability;
pub mod profile;
