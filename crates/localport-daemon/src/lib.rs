pub mod daemon;
pub mod reconcile;
pub mod signals;
pub mod types;

pub use daemon::DaemonRuntime;
pub use types::DaemonSettings;
