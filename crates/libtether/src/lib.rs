#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
//! Core library for replaying local Git history into a centralized,
//! integer-versioned changeset store.
//!
//! The crate bridges two id spaces: content-addressed commits on the local
//! side and strictly increasing changeset numbers on the store side. The
//! [`checkin`] module holds the synchronization engine; [`map`] keeps the
//! durable mapping between the two histories; [`walker`] turns commit graph
//! spans into ordered deltas. The CLI binary in `crates/tether` builds on top
//! of this library.

/// The checkin synchronization engine and workspace lifecycle.
pub mod checkin;
/// Persisted bridge configuration.
pub mod config;
/// Directory-backed implementation of the store contract.
pub mod dirstore;
/// Error types shared across the crate.
pub mod error;
/// Git plumbing helpers.
pub mod git;
/// The durable changeset-commit map and pre-checkin reconciliation.
pub mod map;
/// Pending-change computation for commit deltas.
pub mod pend;
/// Capability contracts for the changeset store.
pub mod remote;
/// Packaging pending changes into review bundles.
pub mod shelve;
/// Task, status, and progress framework.
pub mod task;
/// Commit graph walking and depth limiting.
pub mod walker;

pub use error::{Result, TetherError};
