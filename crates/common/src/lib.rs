//! Shared data model for the job master client service.
//!
//! Identifier hierarchy, report snapshots and command events used by
//! both the daemon and the client library.

pub mod events;
pub mod ids;
pub mod records;
