//! Stable identity for an observed order or fill.
//!
//! The key is built from the fields that make two observations "the same
//! order" to an outside observer: instrument, side, price level and size.
//! Observation time is never part of it, so a resting order seen on two
//! consecutive polls maps to the same fingerprint and is only alerted once.

use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

const SEP: char = '|';

/// Delimited `instrument|SIDE|price|quantity` key. Distinct field values can
/// never produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the fingerprint for an observation. Pure and total.
pub fn fingerprint(
    instrument_id: &str,
    side: &str,
    unit_price: Decimal,
    quantity: Decimal,
) -> Fingerprint {
    let mut key = String::with_capacity(instrument_id.len() + side.len() + 24);
    push_escaped(&mut key, instrument_id);
    key.push(SEP);
    push_escaped(&mut key, &side.trim().to_ascii_uppercase());
    key.push(SEP);
    key.push_str(&unit_price.normalize().to_string());
    key.push(SEP);
    key.push_str(&quantity.normalize().to_string());
    Fingerprint(key)
}

// Instrument ids are upstream-controlled; a literal separator inside one
// would otherwise shift field boundaries.
fn push_escaped(out: &mut String, field: &str) {
    for c in field.chars() {
        if c == SEP || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
}
