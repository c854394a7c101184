//! Database module: the persistent topic queue.
//!
//! This module is split into two submodules:
//! - `model`: typed queue entities returned by repositories.
//! - `repo`: SQL-only functions that map rows into entities.
//!
//! Every mutation runs as its own statement and is committed immediately, so
//! the stored status always reflects the last completed queue operation.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{NewTopic, Topic, TopicStatus};
