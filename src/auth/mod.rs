//! User login via the OAuth2 implicit grant

mod implicit;

pub use implicit::{AccessToken, AuthError, AuthorizationRequest, OAuthConfig};
