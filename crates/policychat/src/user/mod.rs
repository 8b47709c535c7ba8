//! Users that can sign in with a password.

mod models;
mod repository;

pub use models::{CreateUserRequest, User};
pub use repository::UserRepository;
