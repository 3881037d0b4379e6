//! Core types for the `ReplayQ` backtesting engine

#![deny(warnings)]
#![deny(clippy::all)]
#![deny(missing_docs)]
#![forbid(unsafe_code)]

pub mod atomic;
pub mod clock;
pub mod types;

pub use atomic::AtomicF64;
pub use clock::Clock;
pub use types::{Px, Qty, Side, Symbol, Ts};
