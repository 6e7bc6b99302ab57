//! Units of work.
//!
//! The coordinator hands out either a plain execution context for
//! single reads, or a unit of work whose context groups several reads and
//! writes into one all-or-nothing change.

use async_trait::async_trait;
use std::ops::DerefMut;
use walletd_common::Result;

/// Source of execution contexts.
#[async_trait]
pub trait TransactionCoordinator: Send + Sync {
    /// Context the gateways run against.
    type Context: Send;

    /// Non-transactional handle to a context.
    type Connection: DerefMut<Target = Self::Context> + Send;

    /// Transactional handle to a context.
    type Unit: UnitOfWork<Context = Self::Context>;

    /// Get a plain context for reads outside any unit of work.
    async fn acquire(&self) -> Result<Self::Connection>;

    /// Open a unit of work.
    async fn begin(&self) -> Result<Self::Unit>;

    /// Check that the store answers.
    async fn ping(&self) -> Result<()>;
}

/// An open all-or-nothing change.
///
/// Dropping a unit that was never committed discards its effects.
#[async_trait]
pub trait UnitOfWork: Send {
    type Context: Send;

    /// Context bound to this unit. Fails once the unit has finished.
    fn context(&mut self) -> Result<&mut Self::Context>;

    /// Make every write in the unit durable.
    async fn commit(&mut self) -> Result<()>;

    /// Discard every write in the unit.
    ///
    /// Calling it again, or after a commit, does nothing.
    async fn rollback(&mut self) -> Result<()>;
}
