//! Price-time-priority limit order book
//!
//! One [`book::OrderBook`] per symbol: two price-keyed ladders (bids
//! descending, asks ascending) of lock-free [`price_level::PriceLevel`]s,
//! an order lookup table for cancel/modify, and a cached best-quote pair.
//! Matching is CAS-driven at the order level, so concurrent matches and
//! cancels proceed without locks; only ladder-map mutations take a writer
//! lock.

#![deny(clippy::all)]
#![allow(unsafe_code)] // Intrusive chains inside price levels

pub mod book;
pub mod order;
pub mod price_level;

use thiserror::Error;

pub use book::{BookConfig, BookStatsSnapshot, MarketSnapshot, MatchResult, OrderBook,
    SnapshotLevel};
pub use order::{FillOutcome, Order, OrderStatus};
pub use price_level::PriceLevel;

use common::Px;

/// Order book operation failures
///
/// All of these are recoverable: the offending call is a no-op and the book
/// invariants are untouched.
#[derive(Debug, Error, PartialEq)]
pub enum BookError {
    /// Non-positive or non-finite price
    #[error("invalid price {price}")]
    InvalidPrice {
        /// The rejected price
        price: f64,
    },

    /// Non-positive or non-finite quantity
    #[error("invalid quantity {quantity}")]
    InvalidQuantity {
        /// The rejected quantity
        quantity: f64,
    },

    /// An order with this id is already resting
    #[error("duplicate order id {id}")]
    DuplicateOrder {
        /// The conflicting id
        id: u64,
    },

    /// No resting order with this id
    #[error("unknown order id {id}")]
    UnknownOrder {
        /// The unresolved id
        id: u64,
    },

    /// Order price does not match the price level it was routed to
    #[error("order priced {actual} added to level {expected}")]
    PriceMismatch {
        /// Level price
        expected: Px,
        /// Order price
        actual: Px,
    },
}
