pub mod health;
pub mod metrics;
pub mod signup;
pub mod validate;

pub use health::{health_check, readiness_check};
pub use metrics::metrics_handler;
pub use signup::publish_signup;
pub use validate::validate_session;
