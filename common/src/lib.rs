//! walletd Common Types
//!
//! Shared types used across the walletd workspace: the exact-decimal
//! monetary type, store-assigned identifiers, and the ledger error taxonomy.

pub mod identifiers;
pub mod monetary;
pub mod error;
pub mod time;

pub use identifiers::*;
pub use monetary::*;
pub use error::*;
pub use time::*;
