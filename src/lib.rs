//! AgentFlow Library
//!
//! Agents plan work with an LLM, execute it, and hand the steps only a person
//! can do back to their owner as dependencies. Completing the last dependency
//! restarts the agent.
//!
//! This module exports the core components for testing and integration.

pub mod actions;
pub mod cache;
pub mod cli;
pub mod config;
pub mod db;
pub mod effects;
pub mod engine;
pub mod error;
pub mod format;
pub mod lifecycle;
pub mod llm;
pub mod logging;
pub mod notify;
pub mod planner;
pub mod server;
pub mod settings;
pub mod types;
pub mod vault;
