//! Command implementations for the topnode CLI

pub mod config;
pub mod nodes;
