pub mod devtools;
pub mod launcher;
pub mod port;
pub mod supervisor;

pub use port::{PortRegistry, PortSnapshot, ReleaseOutcome};
pub use supervisor::{ChromeSupervisor, LaunchOutcome};
