pub mod escalation;
pub mod events;
pub mod field;
pub mod request;
pub mod step;
pub mod template;
