//! Core logic: recipe types, parsing, path confinement, execution.

pub mod deploy;
pub mod error;
pub mod executor;
pub mod parser;
pub mod paths;
pub mod recipe;
pub mod servercfg;
pub mod types;
