//! Bazaar conversation server library.
//! This crate exposes internal modules for integration testing and for the
//! embedding client (the notify module). The binary entry point is in main.rs.

pub mod auth;
pub mod config;
pub mod conversations;
pub mod db;
pub mod directory;
pub mod error;
pub mod messages;
pub mod notify;
pub mod read_state;
pub mod routes;
pub mod session;
pub mod state;
