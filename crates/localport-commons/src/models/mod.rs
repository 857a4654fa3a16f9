pub mod forward_model;
pub mod health_model;
pub mod response;
pub mod service_model;
