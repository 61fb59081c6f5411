//! Core types for the Meridian ledger node.
//!
//! This crate provides the foundational types used throughout the node:
//!
//! - **Primitives**: [`Digest`], [`Identity`], [`ShardMask`]
//! - **Chain types**: [`Block`], [`Slice`], [`ProofOfWork`]
//! - **Packing types**: [`TransactionLayout`], [`TransactionSummary`]
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not depend
//! on any other workspace crates, making it the foundation layer.

mod block;
mod digest;
mod identity;
mod shard_mask;
mod transaction;

pub use block::{Block, ProofOfWork, Slice};
pub use digest::{Digest, HexError, GENESIS_DIGEST, GENESIS_MERKLE_ROOT};
pub use identity::Identity;
pub use shard_mask::ShardMask;
pub use transaction::{TransactionLayout, TransactionStatus, TransactionSummary};
