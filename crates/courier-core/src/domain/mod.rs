//! Domain model (IDs, messages, statuses, history, errors).

pub mod delivery;
pub mod errors;
pub mod history;
pub mod ids;
pub mod message;
pub mod status;

pub use delivery::DeliveryResult;
pub use errors::{CoordinatorError, ErrorKind, StoreError, TransportError};
pub use history::{ExecutionHistoryEntry, LogLevel};
pub use ids::{HistoryId, MessageId};
pub use message::{Message, NewMessage, StatusChange};
pub use status::{MessageStatus, StatusCounts};
