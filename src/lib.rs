//! apwatch - Archipelago tracker watcher
//!
//! This library crate exposes internal modules for integration testing.

pub mod app;
pub mod commands;
pub mod config;
pub mod data;
pub mod error;
pub mod integrations;
pub mod notify;
pub mod store;
pub mod tracking;
pub mod util;
