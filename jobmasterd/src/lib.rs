//! Job Master Client Service
//!
//! Client-facing control/query endpoint of the job execution master.
//! Resolves hierarchical job/task/attempt identifiers against the
//! entity registry, serves read-only report snapshots and converts
//! kill/fail requests into events on the master's bus.

pub mod acl;
pub mod config;
pub mod error;
pub mod events;
pub mod handler;
pub mod registry;
pub mod secrets;
pub mod service;
pub mod webapp;
