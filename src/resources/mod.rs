//! Action handlers: filesystem, archives, version control, database.
//!
//! Handlers take already-resolved absolute paths and report failure as
//! [`crate::core::error::TaskError`].

pub mod archive;
pub mod database;
pub mod fs;
pub mod vcs;
