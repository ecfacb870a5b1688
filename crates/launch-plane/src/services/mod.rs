pub mod credentials;
pub mod deployments;
pub mod intake;
pub mod memory;
pub mod orchestrator;
pub mod provision;
