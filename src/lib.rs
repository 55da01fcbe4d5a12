//! # Key Pool Library
//!
//! Core of the key pool service: a shared pool of provider API keys that
//! concurrent callers lease from, plus the administrative and HTTP surfaces
//! around it.

pub mod auth;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod pool;
pub mod repositories;
pub mod server;
pub mod sweeper;
pub mod telemetry;
pub use migration;
