//! Event model for the backtesting bus
//!
//! All events are plain-old-data: `Copy`, fixed size, no heap. They live in
//! typed pool cells and travel across the ring buffer as packed handles, so
//! nothing here allocates on the hot path.

use common::{Side, Symbol};
use serde::{Deserialize, Serialize};

/// Discriminant for the event variants carried by the bus
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// OHLCV market bar
    Bar = 0,
    /// Strategy trading signal
    Signal = 1,
    /// Simulated trade execution
    Fill = 2,
}

impl EventKind {
    /// Decode a kind from its wire tag
    #[must_use]
    pub const fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Bar),
            1 => Some(Self::Signal),
            2 => Some(Self::Fill),
            _ => None,
        }
    }
}

/// Common header stamped by the event pool on acquisition
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventHeader {
    /// Wall-clock nanoseconds since the UNIX epoch
    pub ts_wall_ns: u64,
    /// Monotonic nanoseconds since engine start
    pub ts_mono_ns: u64,
    /// Monotone creation counter, unique per pool
    pub seq: u64,
}

/// One OHLCV bar of historical market data
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketBarEvent {
    /// Common event header
    pub header: EventHeader,
    /// Instrument the bar belongs to
    pub symbol: Symbol,
    /// Opening price
    pub open: f64,
    /// High price
    pub high: f64,
    /// Low price
    pub low: f64,
    /// Closing price
    pub close: f64,
    /// Traded volume
    pub volume: f64,
}

/// Direction requested by a strategy signal
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    /// Enter or increase a long position
    Buy,
    /// Enter or increase a short position
    Sell,
    /// No action
    #[default]
    Hold,
    /// Close any open position regardless of direction
    Exit,
}

/// Trading signal emitted by a strategy
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalEvent {
    /// Common event header
    pub header: EventHeader,
    /// Registry id of the emitting strategy
    pub strategy_id: u32,
    /// Instrument the signal targets
    pub symbol: Symbol,
    /// Requested direction
    pub kind: SignalKind,
    /// Strategy confidence in [0, 1]
    pub confidence: f64,
    /// Suggested order quantity
    pub quantity: f64,
}

/// Simulated execution produced by the execution layer
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FillEvent {
    /// Common event header
    pub header: EventHeader,
    /// Instrument that traded
    pub symbol: Symbol,
    /// Executed quantity, always positive
    pub quantity: f64,
    /// Execution price
    pub price: f64,
    /// Commission charged for the execution
    pub commission: f64,
    /// Side of the aggressor
    pub side: Side,
}

/// Tagged union of every event the bus can carry
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Event {
    /// Market data bar
    Bar(MarketBarEvent),
    /// Strategy signal
    Signal(SignalEvent),
    /// Trade execution
    Fill(FillEvent),
}

impl Event {
    /// The variant tag of this event
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Bar(_) => EventKind::Bar,
            Self::Signal(_) => EventKind::Signal,
            Self::Fill(_) => EventKind::Fill,
        }
    }

    /// The common header of this event
    #[must_use]
    pub const fn header(&self) -> &EventHeader {
        match self {
            Self::Bar(e) => &e.header,
            Self::Signal(e) => &e.header,
            Self::Fill(e) => &e.header,
        }
    }
}
