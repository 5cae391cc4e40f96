//! Records owned or referenced by the token lifecycle.

mod code;
mod token;
mod user;

pub use code::AuthorizationCode;
pub use token::{generate_token, AuthorizationToken};
pub use user::{hash_password, ProviderUserInformation, Registration, User};
