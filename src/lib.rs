//! Slotwatch library - embassy appointment slot watcher
//!
//! This module exports internal components for integration testing.

pub mod check;
pub mod commands;
pub mod config;
pub mod decide;
pub mod fetch;
pub mod health;
pub mod notify;
pub mod parser;
pub mod scheduler;
pub mod store;
pub mod supervisor;
pub mod telegram;
