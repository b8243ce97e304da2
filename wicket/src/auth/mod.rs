//! Authentication and authorization.
//!
//! # Modules
//!
//! - [`password`]: Argon2 password hashing and one-time token generation
//! - [`permissions`]: Effective permission values from group overrides
//! - [`session`]: The session entity and its stored payload format
//! - [`session_store`]: Volatile, durable and tiered session storage
//! - [`service`]: [`AuthService`], the login, logout, registration and password reset flows
//!
//! # Usage
//!
//! ```ignore
//! use wicket::auth::{AuthService, ClientInfo};
//!
//! let service = AuthService::new(pool, cache, &config);
//! let session = service
//!     .login("a@b.com", "secret", ClientInfo::new(user_agent, ip), false)
//!     .await?;
//!
//! if session.has_permission("export") {
//!     // ...
//! }
//! ```

pub mod password;
pub mod permissions;
pub mod service;
pub mod session;
pub mod session_store;

pub use service::{AuthService, ClientInfo, PasswordResetTicket, Registration, RegistrationRequest};
pub use session::Session;
