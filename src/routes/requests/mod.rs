mod prelude;
mod steps;
mod submit;

pub use steps::{advance_step, assign_step, delegate_step, escalate_step, reassign_step};
pub use submit::{edit_values, get_request, retry_role_grants, submit_request};
