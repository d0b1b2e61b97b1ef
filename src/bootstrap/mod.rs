//! Bootstrap: idempotent installation and repair of the runtime's tools.
//!
//! Submodules:
//! - `machine`: the `Bootstrapper` state machine and health check
//! - `steps`: individual install steps (optional CLIs, environment, packages)
//! - `marker`: the persisted, versioned completion marker
//! - `types`: report and marker types

pub mod machine;
pub mod marker;
pub mod steps;
pub mod types;

pub use machine::{bootstrap_default, Bootstrapper, BOOTSTRAP_STEP};
pub use marker::MARKER_SCHEMA_VERSION;
pub use types::{BootstrapReport, BootstrapStepResult, StateMarker, StepState};
