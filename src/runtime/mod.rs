//! Runtime root: filesystem layout, tool resolution, and settings.
//!
//! Every other subsystem receives a [`RuntimeLayout`] and only touches its
//! own subtree of the root.

pub mod config;
pub mod errors;
pub mod layout;
pub mod resolver;

pub use config::RuntimeSettings;
pub use errors::LayoutError;
pub use layout::RuntimeLayout;
pub use resolver::InstallResolver;
