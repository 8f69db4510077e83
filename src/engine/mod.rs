pub mod clock;
pub mod conditions;
mod error;
mod escalation;
mod executor;
pub mod roles;
pub mod routing;
pub mod state_machine;
pub mod validator;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Capability, EngineError};
pub use executor::{EngineServices, TickReport, WorkflowEngine};
pub use validator::{ValidationError, ValidationErrors, ValidationReason};
