//! Authentication Module
//!
//! Registration, credential checks, email verification and the refresh
//! token lifecycle.

pub mod crypto;
pub mod error;
pub mod hasher;
pub mod notify;
pub mod service;
pub mod tokens;
pub mod types;
pub mod verification;

pub use error::{AuthError, Status};
pub use hasher::{Argon2Hasher, PasswordHasher};
pub use notify::{ChannelNotifier, LogNotifier, Notifier, VerificationNotice};
pub use service::AuthService;
pub use tokens::{AccessTokenSigner, TokenManager};
pub use types::{
    Claims, IssuedFlow, LoginOutcome, NewUser, Session, SessionState, TokenPair, User, UserId,
    VerificationFlow,
};
pub use verification::VerificationFlowStore;
