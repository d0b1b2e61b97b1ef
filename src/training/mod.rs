//! Training: single-flight fine-tuning jobs and their artifacts.
//!
//! This module handles:
//! - Running `mlx_lm.lora` to completion with cancellation and full log capture
//! - Seeding dataset directories without clobbering user data
//! - Listing and deleting trained adapters

pub mod adapters;
pub mod dataset;
pub mod errors;
pub mod runner;
pub mod types;

pub use adapters::AdapterRegistry;
pub use dataset::create_dataset_scaffold;
pub use errors::TrainingError;
pub use runner::{TrainingJobRunner, TRAINER_EXECUTABLE};
pub use types::{
    AdapterInfo, ArtifactMetadata, DatasetFormat, TrainingOutcome, TrainingPhase, TrainingRequest,
};
