//! Database module: entity models and SQL repositories.
//!
//! - `model`: records written by callers (new users).
//! - `repo`: SQL-only functions that map rows into [`crate::model::User`].
//!
//! External modules import from `release_watchbot::db`; the repository API is
//! re-exported here.

pub mod model;
pub mod repo;

pub use model::NewUser;
pub use repo::*;
