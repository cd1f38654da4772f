pub mod message_queue;
pub mod poll_service;

pub use message_queue::{ConnectionState, DecodedMessage, MessageQueue};
pub use poll_service::{PollService, PollSettings, PollSummary};
