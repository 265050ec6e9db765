//! Runtime control loop and intake API surface.

pub mod api;
pub mod control_loop;

pub use api::{submit_request, StatusResponse, SubmitRequest, SubmitResponse};
pub use control_loop::{spawn_control_loop, ControlLoopHandle};
