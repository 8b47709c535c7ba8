//! Wire types for policychat.
//!
//! This crate defines the formats exchanged between the server and its clients:
//!
//! ```text
//! Client --[REST: sessions, messages, mutations]--> Server
//! Client --[POST /chat/stream]--> Server --[SSE: typed chunks]--> Client
//! ```
//!
//! ## Design Principles
//!
//! 1. **Messages are persistent, chunks are ephemeral.** A turn's chunks are never
//!    stored; only the finished assistant message is.
//! 2. **The server resolves sessions.** A turn carries an optional chat id and the
//!    client adopts whatever id the first `chat_info` chunk announces.
//! 3. **Every turn ends with exactly one `status` chunk.**
//! 4. **Snapshots are stamped.** Every session summary carries `updated_at`, which
//!    clients use for last-writer-wins reconciliation.

pub mod chunk;
pub mod message;
pub mod session;
pub mod titles;
pub mod turn;

pub use chunk::{ChatInfo, ErrorInfo, StatusInfo, StreamChunk, ToolCall, ToolOutput, TurnStatus};
pub use message::{ChatMessage, Role};
pub use session::{ArchiveAllResponse, ChatId, ChatSummary, CreateChatRequest, RenameRequest};
pub use titles::{DERIVED_TITLE_CHARS, MAX_TITLE_CHARS, TitleError, derive_title, validate_title};
pub use turn::{TokenResponse, TurnRequest};
