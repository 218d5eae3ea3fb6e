//! Replays the offline queue against the portal API.
//!
//! # Flow
//!
//! Mutations made offline are stored by [`crate::db::QueueRepository`].
//! When a [`SyncTrigger`] fires (reconnect, periodic timer, a `SYNC_QUEUE`
//! broadcast from the caching proxy, or the user) the [`SyncEngine`]
//! drains due items in enqueue order through a [`RemoteApi`]:
//!
//! - success removes the item;
//! - failure records a sync error and schedules a retry with backoff;
//! - once the retry budget is spent the item moves to the dead-letter list.

pub mod client;
pub mod conflict;
pub mod engine;
pub mod error;
pub mod listener;
pub mod probe;
pub mod retry;

pub use client::{route_for, HttpRemoteApi, RemoteApi, Route};
pub use conflict::ConflictStrategy;
pub use engine::{FailedItem, SyncEngine, SyncReport};
pub use error::{RemoteError, SyncEngineError};
pub use listener::{clients_url, listen};
pub use probe::{check_server, Connectivity, NetworkProbe, SyncTrigger};
pub use retry::RetryPolicy;
