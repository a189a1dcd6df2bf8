//! Common types and utilities for hayashi.
//!
//! This crate provides the shared vocabulary used across the hayashi
//! workspace. It is dependency-light: pure data types and helpers with no
//! I/O or side effects, suitable as a foundation for every other crate.
//!
//! # Key types
//!
//! - [`Hash256`] - a 32-byte SHA-256 content address used to identify
//!   envelopes, quorum-set descriptors and transaction-set payloads
//! - [`SlotIndex`] - the index of one consensus round

pub mod types;

pub use types::{Hash256, SlotIndex};

/// Re-export stellar-xdr for convenience.
///
/// This allows other crates to access XDR types through
/// `hayashi_common::stellar_xdr` without a direct dependency.
pub use stellar_xdr;
