pub mod error;
pub mod input;
pub mod rate_limit;
pub mod store;
pub mod types;
pub mod validation;
pub mod window;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{ChatError, Result, ValidationError};
pub use input::{InputConfig, Key, KeyPress, MessageInput, MessageSender, SendOutcome, TypingNotifier};
pub use rate_limit::SlidingWindowLimiter;
pub use store::{ChangeStream, MemoryMessageStore, MessageStore};
pub use types::{
    ChangeEvent, ConnectionStatus, DeliveryStatus, FailedMessage, LocalMessage, Message,
    MessageView, NewMessage, PendingMessage, TypingSignal,
};
pub use window::{ChatWindow, WindowOptions};
