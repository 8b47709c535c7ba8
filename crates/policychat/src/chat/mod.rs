//! Chat sessions and messages.

mod error;
mod models;
mod repository;

pub use error::{StoreError, StoreResult};
pub use models::{ChatRow, MessageRow, Page, ResolvedChat};
pub use repository::ChatRepository;
