//! Wire codec for the forex provider protocol
//!
//! Subscription request (6 bytes):
//! - bytes 0-3: IPv4 address, network byte order
//! - bytes 4-5: port, network byte order
//!
//! Quote record (32 bytes, big-endian):
//! - bytes 0-5:   base and quote currency, ASCII, no separator
//! - bytes 6-9:   price, IEEE-754 single precision
//! - bytes 10-17: timestamp, u64 microseconds since the Unix epoch (UTC)
//! - bytes 18-31: reserved
//!
//! A datagram is zero or more records back to back. A trailing chunk shorter
//! than a full record is still handed to the decoder, which rejects it.

use chrono::{DateTime, Utc};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use thiserror::Error;

use crate::currency::{Currency, CurrencyPair, Quote};

pub const SUBSCRIPTION_SIZE: usize = 6;
pub const QUOTE_RECORD_SIZE: usize = 32;

const PAIR_END: usize = 6;
const PRICE_END: usize = 10;
const TIMESTAMP_END: usize = 18;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    #[error("malformed record: {len} bytes, expected 32")]
    MalformedRecord { len: usize },

    #[error("invalid currency code in record: {0}")]
    InvalidCurrency(#[from] crate::currency::InvalidCurrency),

    #[error("pair {0} quotes a currency against itself")]
    SameCurrency(String),

    #[error("invalid price {0}: must be finite and positive")]
    InvalidPrice(f32),

    #[error("timestamp {0}us is out of range")]
    InvalidTimestamp(u64),

    #[error("subscription address must be IPv4 and 6 bytes: {0}")]
    BadAddress(String),
}

/// Encode the local return address for the subscription request
pub fn serialize_address(addr: SocketAddrV4) -> [u8; SUBSCRIPTION_SIZE] {
    let mut out = [0u8; SUBSCRIPTION_SIZE];
    out[..4].copy_from_slice(&addr.ip().octets());
    out[4..].copy_from_slice(&addr.port().to_be_bytes());
    out
}

/// Same as `serialize_address`, for whatever `local_addr()` handed back
pub fn serialize_socket_addr(addr: SocketAddr) -> Result<[u8; SUBSCRIPTION_SIZE], CodecError> {
    match addr {
        SocketAddr::V4(v4) => Ok(serialize_address(v4)),
        SocketAddr::V6(v6) => Err(CodecError::BadAddress(v6.to_string())),
    }
}

pub fn deserialize_address(bytes: &[u8]) -> Result<SocketAddrV4, CodecError> {
    let bytes: [u8; SUBSCRIPTION_SIZE] = bytes
        .try_into()
        .map_err(|_| CodecError::BadAddress(format!("{} bytes", bytes.len())))?;
    let ip = Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]);
    let port = u16::from_be_bytes([bytes[4], bytes[5]]);
    Ok(SocketAddrV4::new(ip, port))
}

pub fn deserialize_price(bytes: [u8; 4]) -> f32 {
    f32::from_be_bytes(bytes)
}

pub fn serialize_price(price: f32) -> [u8; 4] {
    price.to_be_bytes()
}

pub fn deserialize_timestamp(bytes: [u8; 8]) -> Result<DateTime<Utc>, CodecError> {
    let micros = u64::from_be_bytes(bytes);
    i64::try_from(micros)
        .ok()
        .and_then(DateTime::from_timestamp_micros)
        .ok_or(CodecError::InvalidTimestamp(micros))
}

pub fn serialize_timestamp(ts: DateTime<Utc>) -> [u8; 8] {
    // Pre-epoch instants clamp to zero, the wire field is unsigned
    let micros = ts.timestamp_micros().max(0) as u64;
    micros.to_be_bytes()
}

/// Build one 32-byte record. Reserved bytes are zeroed.
pub fn encode_quote(pair: CurrencyPair, price: f32, ts: DateTime<Utc>) -> [u8; QUOTE_RECORD_SIZE] {
    let mut out = [0u8; QUOTE_RECORD_SIZE];
    out[0..3].copy_from_slice(pair.base.as_bytes());
    out[3..PAIR_END].copy_from_slice(pair.quote.as_bytes());
    out[PAIR_END..PRICE_END].copy_from_slice(&serialize_price(price));
    out[PRICE_END..TIMESTAMP_END].copy_from_slice(&serialize_timestamp(ts));
    out
}

/// Decode one record. Anything shorter than a full record is `MalformedRecord`.
pub fn decode_quote(record: &[u8]) -> Result<(CurrencyPair, Quote), CodecError> {
    if record.len() < QUOTE_RECORD_SIZE {
        return Err(CodecError::MalformedRecord { len: record.len() });
    }

    let base = Currency::from_bytes([record[0], record[1], record[2]])?;
    let quote = Currency::from_bytes([record[3], record[4], record[5]])?;
    if base == quote {
        return Err(CodecError::SameCurrency(format!("{}/{}", base, quote)));
    }

    let mut price_bytes = [0u8; 4];
    price_bytes.copy_from_slice(&record[PAIR_END..PRICE_END]);
    let price = deserialize_price(price_bytes);
    if !price.is_finite() || price <= 0.0 {
        return Err(CodecError::InvalidPrice(price));
    }

    let mut ts_bytes = [0u8; 8];
    ts_bytes.copy_from_slice(&record[PRICE_END..TIMESTAMP_END]);
    let observed_at = deserialize_timestamp(ts_bytes)?;

    Ok((
        CurrencyPair::new(base, quote),
        Quote::new(price as f64, observed_at),
    ))
}

/// Split a datagram into record-sized chunks, trailing partial chunk included
pub fn split_records(datagram: &[u8]) -> std::slice::Chunks<'_, u8> {
    datagram.chunks(QUOTE_RECORD_SIZE)
}

/// Decode every record in a datagram; each chunk fails or succeeds on its own
pub fn decode_datagram(
    datagram: &[u8],
) -> impl Iterator<Item = (&[u8], Result<(CurrencyPair, Quote), CodecError>)> + '_ {
    split_records(datagram).map(|chunk| (chunk, decode_quote(chunk)))
}
