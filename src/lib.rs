//! fxdeploy: recipe-driven FXServer provisioning.
//!
//! A recipe is an ordered list of tasks (git checkouts, downloads, archive
//! extraction, file operations, SQL bootstrap). Every task path resolves
//! inside a single deployment root. Unsupported work is skipped; anything
//! else that fails stops the run.

pub mod cli;
pub mod core;
pub mod journal;
pub mod resources;
pub mod transport;
