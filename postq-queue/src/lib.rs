pub mod backends;
pub mod config;
pub mod error;
pub mod message;
pub mod store;
pub mod types;

pub use backends::{FileMessageStore, MemoryMessageStore};
pub use config::QueueConfig;
pub use error::{QueueError, Result, SerializationError};
pub use message::QueuedMessage;
pub use store::MessageStore;
pub use types::MessageId;
