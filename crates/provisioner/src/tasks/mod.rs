//! Background tasks run by the provisioner binary.

pub mod retention;

pub use retention::{run_retention_pass, start_retention_task};
