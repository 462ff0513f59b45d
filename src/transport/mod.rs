//! Transport Module
//!
//! JSON over HTTP mapping of the remote-call surface onto `AuthService`.

pub mod api;
pub mod auth;
pub mod handlers;
pub mod server;
pub mod types;

pub use api::AuthApi;
pub use handlers::AppState;
pub use server::AuthServer;
pub use types::{ApiError, ErrorBody};
