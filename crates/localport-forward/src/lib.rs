pub mod adapters;
pub mod error;
pub mod manager;
pub mod network_utils;
pub mod registry;

pub use adapters::TransportAdapter;
pub use error::ForwardError;
pub use manager::ServiceManager;
pub use registry::ServiceRegistry;
