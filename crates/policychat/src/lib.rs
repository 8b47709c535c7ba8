//! Policy assistant chat server.
//!
//! Owns chat sessions and their messages, streams assistant turns to clients
//! as Server-Sent Events, and issues bearer tokens.

pub mod api;
pub mod assistant;
pub mod auth;
pub mod chat;
pub mod db;
pub mod settings;
pub mod stream;
pub mod user;
