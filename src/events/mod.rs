//! Transaction event system for observability collaborators
//!
//! This module provides:
//! - `TransactionEvent` - typed events published by the driver manager and
//!   the transaction executor
//! - `EventSink` - the publish interface they depend on
//! - `EventBus` - broadcast channel distributing events to subscribers

mod bus;
mod types;

pub use bus::EventBus;
pub(crate) use types::now;
pub use types::{
    DriverClosed, EventSink, NullSink, PoolPressure, TransactionEvent, TransactionFailed,
    TransactionSucceeded,
};
