pub mod chat;
pub mod connection;
pub mod dispatcher;
pub mod error;

pub use chat::{ChatAccess, ChatContext, NewAttachment};
pub use dispatcher::Dispatcher;
pub use error::ApiError;
