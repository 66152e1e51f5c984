//! OAuth2 authorization-code grant: interactive authorization and token
//! exchange.

pub mod authorize;
pub mod storage;
pub mod token;
pub mod types;
