//! Registration, passphrase authentication, and session management.

pub mod bearer;
pub mod profile;
pub mod session;
pub mod signup;
mod state;
pub mod storage;
pub mod types;
pub mod utils;
pub mod verify;

pub use state::{AuthConfig, AuthState};
