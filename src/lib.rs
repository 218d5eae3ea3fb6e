//! Offline support for the SMS onboarding portal.
//!
//! Mutations made while offline are queued in SQLite and replayed against the
//! portal API by [`sync::SyncEngine`]. The [`cache`] module fronts the portal
//! with named response caches, and [`server`] exposes it as a local proxy.

pub mod cache;
pub mod config;
pub mod db;
pub mod models;
pub mod photo;
pub mod server;
pub mod state;
pub mod sync;
