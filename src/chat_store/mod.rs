mod models;
mod schema;
mod sqlite_chat_store;

pub use models::*;
pub use schema::CHAT_VERSIONED_SCHEMAS;
pub use sqlite_chat_store::{read_date, read_optional_date, SqliteChatStore};
