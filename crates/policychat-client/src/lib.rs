//! Client for the policychat server.
//!
//! [`ChatClient`] talks to the server and keeps a [`ChatView`] current:
//! the session list (reconciled optimistically), the active conversation,
//! and the reply while it streams in.

pub mod api;
pub mod config;
pub mod error;
pub mod reconciler;
pub mod session;
pub mod turn;
pub mod view;

pub use api::{ChatApi, TurnStream};
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};
pub use reconciler::{MutationId, SessionEntry, SessionList, Stamped};
pub use session::ChatClient;
pub use turn::{ChunkOutcome, TurnTicket};
pub use view::{ChatView, LocalMessage, MessageKey, Notice, ReplyBuffer, ToolActivity, TurnId};
