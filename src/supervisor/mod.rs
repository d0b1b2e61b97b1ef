//! Process Supervisor: exclusive lifecycle of the local inference server.
//!
//! This module handles:
//! - Launching `mlx_lm.server` from the private prefix with model/host/port
//! - Readiness polling with a bounded deadline
//! - Idempotent start, restart on a different model, and awaited stop

pub mod errors;
pub mod readiness;
pub mod server;

pub use errors::SupervisorError;
pub use server::{ProcessSupervisor, ServerInfo, ServerPhase, SupervisorConfig, SERVER_EXECUTABLE};
