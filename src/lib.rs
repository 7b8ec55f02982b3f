pub mod capability;
pub mod config;
pub mod logging;
pub mod orchestrator;
pub mod supervisor;

pub use capability::{AudioActivityProbe, AudioCapability};
pub use config::{Settings, WorkloadConfig};
pub use orchestrator::Orchestrator;
pub use supervisor::{ProcessSupervisor, SupervisorEvent, SupervisorState};
