//! Run journal: JSONL event log and BLAKE3 digests.

pub mod eventlog;
pub mod hasher;
