//! Data models for time tracking entities.
//!
//! All models serialize in the application (camelCase) convention; the
//! field codec translates them to and from the wire.
//!
//! - `User`: the signed-in account
//! - `Client`, `Project`, `Tag`, `Team`: workspace organization
//! - `TimeEntry`, `NewTimeEntry`: tracked intervals

pub mod time_entry;
pub mod user;
pub mod workspace;

pub use time_entry::{NewTimeEntry, TimeEntry};
pub use user::User;
pub use workspace::{Client, Project, Tag, Team};
