//! Token verification

mod jwt;

pub use jwt::{AuthError, Claims, TokenVerifier};
