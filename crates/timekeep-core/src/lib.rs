//! Client core for the timekeep time tracker.
//!
//! Every network call made by the application goes through [`ApiClient`],
//! which owns the access credential, translates payload keys between the
//! wire (`snake_case`) and application (`camelCase`) conventions, and
//! recovers from expired credentials with a single coordinated refresh.

pub mod api;
pub mod auth;
pub mod codec;
pub mod config;
pub mod models;

pub use api::{ApiClient, ApiError};
pub use auth::{AuthEvent, LogoutReason, Session};
pub use codec::{FieldCodec, FieldConvention};
pub use config::Config;
