//! Authentication state for the API pipeline.
//!
//! This module provides:
//! - `CredentialStore`: in-memory holder of the bearer access token
//! - `RefreshCoordinator`: single-flight refresh with parked waiters
//! - `Session`, `AuthEvent`: login/refresh payloads and lifecycle signals
//!
//! The access token lives only in memory. After a restart the first 401
//! triggers a refresh, which authenticates with the session cookie.

pub mod credentials;
pub mod refresh;
pub mod session;

pub use credentials::{CredentialSnapshot, CredentialStore};
pub use refresh::{Admission, RefreshCoordinator, RefreshFailure, RefreshState, RefreshTicket, Waiter};
pub use session::{AuthEvent, LogoutReason, Session};
