//! REST API client module for the timekeep backend.
//!
//! This module provides the `ApiClient` and the two pipeline stages every
//! call passes through. Authentication uses a short-lived bearer token that
//! is renewed through a cookie-authenticated refresh endpoint.

pub mod auth;
pub mod client;
pub mod error;
pub mod pipeline;
pub mod resources;

pub use auth::SignupRequest;
pub use client::ApiClient;
pub use error::ApiError;
pub use pipeline::{ApiRequest, FormField, RequestBody};
pub use resources::{Resource, ResourceApi};
