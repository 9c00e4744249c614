pub mod api;
pub mod billing;
pub mod config;
pub mod error;
pub mod message_log;
pub mod models;
pub mod poller;
pub mod session;
pub mod state;
pub mod telemetry;
pub mod validation;

pub use api::{ApiClient, ChatBackend};
pub use config::{ClientSettings, ConfigError, PollSettings, TokenSettings};
pub use error::{ApiError, ErrorKind};
pub use message_log::MessageLog;
pub use models::{Conversation, Message, MessageKind, SubscriptionTier};
pub use poller::{ConversationPoller, LogView, PollOutcome};
pub use session::{SessionSnapshot, TokenRecord, TokenSession};
pub use state::{AppState, Section};
pub use validation::Attachment;
