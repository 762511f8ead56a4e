pub mod auth;
pub mod balancer;
pub mod client;
pub mod committer;
pub mod config;
pub mod consumer;
pub mod error;
pub mod message;
pub mod producer;
pub mod session;
pub mod topic;

pub use config::{KafkaEnvConfig, SessionConfig, SessionOptions};
pub use consumer::Consumer;
pub use error::SessionError;
pub use message::{Message, Position};
pub use producer::Producer;
pub use session::Session;
