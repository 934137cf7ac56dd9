//! Tick wire format
//!
//! A tick travels over the bus as a protobuf record with three fields:
//! `symbol` (tag 1), `price` (tag 2, double) and `timestamp` (tag 3,
//! milliseconds since the Unix epoch). The schema is fixed and carries no
//! version negotiation. Producers key each record by its symbol so that every
//! tick for a symbol lands on the same partition.

use prost::Message;
use thiserror::Error;

/// One timestamped price observation for a symbol.
#[derive(Clone, PartialEq, Message)]
pub struct Tick {
    /// Instrument symbol, e.g. `AAPL`
    #[prost(string, tag = "1")]
    pub symbol: String,
    /// Last traded price
    #[prost(double, tag = "2")]
    pub price: f64,
    /// Trade time in milliseconds since the Unix epoch
    #[prost(int64, tag = "3")]
    pub timestamp: i64,
}

impl Tick {
    /// Create a new tick
    pub fn new(symbol: impl Into<String>, price: f64, timestamp: i64) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            timestamp,
        }
    }
}

/// Reasons a payload could not be turned into a [`Tick`].
#[derive(Error, Debug)]
pub enum TickDecodeError {
    /// The message carried no value
    #[error("empty tick payload")]
    EmptyPayload,

    /// The bytes are not a valid tick record
    #[error("malformed tick record: {0}")]
    Malformed(#[from] prost::DecodeError),

    /// The record decoded but has no symbol
    #[error("tick record has no symbol")]
    MissingSymbol,

    /// The record decoded but the price is unusable
    #[error("tick price {0} is not a finite number")]
    InvalidPrice(f64),
}

/// Decode a tick from its wire bytes.
pub fn decode(bytes: &[u8]) -> Result<Tick, TickDecodeError> {
    if bytes.is_empty() {
        return Err(TickDecodeError::EmptyPayload);
    }

    let tick = Tick::decode(bytes)?;

    if tick.symbol.is_empty() {
        return Err(TickDecodeError::MissingSymbol);
    }
    if !tick.price.is_finite() {
        return Err(TickDecodeError::InvalidPrice(tick.price));
    }

    Ok(tick)
}

/// Encode a tick into its wire bytes.
pub fn encode(tick: &Tick) -> Vec<u8> {
    tick.encode_to_vec()
}
