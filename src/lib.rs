pub mod chat;
pub mod config;
pub mod error;
pub mod metrics;
pub mod providers;
pub mod registry;
pub mod server;
pub mod types;

pub use error::{MultiChatError, ProviderError};
pub type Result<T> = std::result::Result<T, MultiChatError>;
