//! Endpoint discovery: find model servers already listening on localhost.

pub mod scanner;
pub mod signature;

pub use scanner::{EndpointCandidate, EndpointScanner, ScanConfig};
pub use signature::{extract_model_hint, ServerSignature};
