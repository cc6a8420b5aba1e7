//! Foundry - project, version and code-task orchestration

pub mod api;
pub mod backend;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod events;
pub mod orchestrator;
pub mod services;
pub mod state_machine;

pub use orchestrator::Orchestrator;
