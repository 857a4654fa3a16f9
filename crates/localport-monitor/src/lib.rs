pub mod monitor;
pub mod probes;
pub mod restart;

pub use monitor::HealthMonitor;
pub use probes::{
    Probe,
    ProbeError,
};
pub use restart::RestartController;
