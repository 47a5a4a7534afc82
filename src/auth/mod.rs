pub mod identity;
pub mod role;
pub mod token;

pub use identity::{ClaimsIdentityResolver, Identity, IdentityMode, IdentityResolver, RemoteIdentityResolver};
pub use role::UserRole;
pub use token::{Claims, TokenVerifier};
