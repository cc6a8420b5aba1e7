//! Integration tests for Foundry
//!
//! Every test runs a full orchestrator against an on-disk SQLite database
//! and a scripted task backend.

mod api;
mod common;
mod recovery;
mod scenarios;
