pub mod consumer;
pub mod publisher;
pub mod trimmer;

pub use consumer::{ConsumerSettings, DiscardReason, ProcessOutcome, SignupConsumer};
pub use publisher::SignupPublisher;
pub use trimmer::{RetentionTrimmer, TrimReport};
