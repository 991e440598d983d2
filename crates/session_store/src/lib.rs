mod error;
mod paths;
mod schema;
mod store;

pub use error::SessionStoreError;
pub use paths::{export_file_name, snapshot_file_name};
pub use schema::{Conversation, IndexEntry, StoredMessage};
pub use store::ConversationStore;
