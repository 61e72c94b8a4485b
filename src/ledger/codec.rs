//! Canonical binary encoding of the transactions the engine submits.
//!
//! Covers only the fields replica transactions carry after autofill and
//! signing. Anything else is rejected rather than silently dropped, since
//! the signature has to cover every field the node will see.

use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::str::FromStr;

use super::keys::decode_address;

/// Prepended to the encoded fields before signing ("STX\0").
pub const SIGNING_PREFIX: [u8; 4] = [0x53, 0x54, 0x58, 0x00];

/// Prepended to the signed blob before hashing ("TXN\0").
pub const TX_ID_PREFIX: [u8; 4] = [0x54, 0x58, 0x4E, 0x00];

const MAX_NATIVE_DROPS: u64 = 100_000_000_000_000_000;
const NATIVE_POSITIVE: u64 = 0x4000_0000_0000_0000;
const ISSUED_BIT: u64 = 0x8000_0000_0000_0000;
const ISSUED_POSITIVE: u64 = 0x4000_0000_0000_0000;
const MIN_MANTISSA: u128 = 1_000_000_000_000_000;
const MAX_MANTISSA: u128 = 10_000_000_000_000_000;
const MIN_EXPONENT: i32 = -96;
const MAX_EXPONENT: i32 = 80;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("Field {0} cannot be encoded")]
    UnsupportedField(String),

    #[error("Invalid {field}: {detail}")]
    InvalidField { field: String, detail: String },

    #[error("Transaction JSON is not an object")]
    NotAnObject,
}

fn invalid(field: &str, detail: impl Into<String>) -> CodecError {
    CodecError::InvalidField {
        field: field.to_string(),
        detail: detail.into(),
    }
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    UInt16,
    UInt32,
    Amount,
    Blob,
    AccountId,
}

impl Kind {
    fn type_code(self) -> u8 {
        match self {
            Kind::UInt16 => 1,
            Kind::UInt32 => 2,
            Kind::Amount => 6,
            Kind::Blob => 7,
            Kind::AccountId => 8,
        }
    }
}

/// (name, kind, field code)
const FIELDS: &[(&str, Kind, u8)] = &[
    ("TransactionType", Kind::UInt16, 2),
    ("Flags", Kind::UInt32, 2),
    ("Sequence", Kind::UInt32, 4),
    ("OfferSequence", Kind::UInt32, 25),
    ("LastLedgerSequence", Kind::UInt32, 27),
    ("Amount", Kind::Amount, 1),
    ("LimitAmount", Kind::Amount, 3),
    ("TakerPays", Kind::Amount, 4),
    ("TakerGets", Kind::Amount, 5),
    ("Fee", Kind::Amount, 8),
    ("SigningPubKey", Kind::Blob, 3),
    ("TxnSignature", Kind::Blob, 4),
    ("Account", Kind::AccountId, 1),
    ("Destination", Kind::AccountId, 3),
];

/// Encode `tx` in canonical field order.
///
/// With `for_signing`, `TxnSignature` is left out so the result is the
/// payload a signature covers (callers add [`SIGNING_PREFIX`]).
pub fn encode(tx: &Value, for_signing: bool) -> Result<Vec<u8>, CodecError> {
    let object: &Map<String, Value> = tx.as_object().ok_or(CodecError::NotAnObject)?;

    let mut fields = Vec::with_capacity(object.len());
    for (name, value) in object {
        if for_signing && name == "TxnSignature" {
            continue;
        }
        let (_, kind, nth) = FIELDS
            .iter()
            .find(|(n, _, _)| *n == name.as_str())
            .ok_or_else(|| CodecError::UnsupportedField(name.clone()))?;
        fields.push((kind.type_code(), *nth, name.as_str(), *kind, value));
    }
    fields.sort_by_key(|(type_code, nth, ..)| (*type_code, *nth));

    let mut out = Vec::with_capacity(256);
    for (type_code, nth, name, kind, value) in fields {
        write_header(&mut out, type_code, nth);
        match kind {
            Kind::UInt16 => {
                let code = match value.as_str() {
                    Some(s) => transaction_type_code(s)
                        .ok_or_else(|| invalid(name, format!("unknown type {s}")))?,
                    None => uint(value, name, u16::MAX as u64)? as u16,
                };
                out.extend_from_slice(&code.to_be_bytes());
            }
            Kind::UInt32 => {
                let v = uint(value, name, u32::MAX as u64)? as u32;
                out.extend_from_slice(&v.to_be_bytes());
            }
            Kind::Amount => write_amount(&mut out, name, value)?,
            Kind::Blob => {
                let bytes = value
                    .as_str()
                    .and_then(|s| hex::decode(s).ok())
                    .ok_or_else(|| invalid(name, "expected a hex string"))?;
                write_length(&mut out, name, bytes.len())?;
                out.extend_from_slice(&bytes);
            }
            Kind::AccountId => {
                let id = value
                    .as_str()
                    .and_then(decode_address)
                    .ok_or_else(|| invalid(name, "expected a classic address"))?;
                write_length(&mut out, name, id.len())?;
                out.extend_from_slice(&id);
            }
        }
    }
    Ok(out)
}

fn transaction_type_code(name: &str) -> Option<u16> {
    match name {
        "Payment" => Some(0),
        "OfferCreate" => Some(7),
        "OfferCancel" => Some(8),
        "TrustSet" => Some(20),
        _ => None,
    }
}

fn uint(value: &Value, field: &str, max: u64) -> Result<u64, CodecError> {
    value
        .as_u64()
        .filter(|v| *v <= max)
        .ok_or_else(|| invalid(field, format!("expected an integer up to {max}")))
}

fn write_header(out: &mut Vec<u8>, type_code: u8, nth: u8) {
    match (type_code < 16, nth < 16) {
        (true, true) => out.push(type_code << 4 | nth),
        (true, false) => out.extend_from_slice(&[type_code << 4, nth]),
        (false, true) => out.extend_from_slice(&[nth, type_code]),
        (false, false) => out.extend_from_slice(&[0, type_code, nth]),
    }
}

fn write_length(out: &mut Vec<u8>, field: &str, len: usize) -> Result<(), CodecError> {
    match len {
        0..=192 => out.push(len as u8),
        193..=12_480 => {
            let rest = len - 193;
            out.push(193 + (rest >> 8) as u8);
            out.push((rest & 0xFF) as u8);
        }
        _ => return Err(invalid(field, format!("{len} bytes is too long"))),
    }
    Ok(())
}

fn write_amount(out: &mut Vec<u8>, field: &str, value: &Value) -> Result<(), CodecError> {
    match value {
        Value::String(drops) => {
            let drops: u64 = drops
                .parse()
                .ok()
                .filter(|d| *d <= MAX_NATIVE_DROPS)
                .ok_or_else(|| invalid(field, format!("bad drops amount {drops}")))?;
            out.extend_from_slice(&(drops | NATIVE_POSITIVE).to_be_bytes());
        }
        Value::Object(amount) => {
            let text = |key: &str| {
                amount
                    .get(key)
                    .and_then(Value::as_str)
                    .ok_or_else(|| invalid(field, format!("missing {key}")))
            };
            out.extend_from_slice(&issued_value_bits(field, text("value")?)?.to_be_bytes());
            out.extend_from_slice(&currency_code(field, text("currency")?)?);
            let issuer = decode_address(text("issuer")?)
                .ok_or_else(|| invalid(field, "issuer is not a classic address"))?;
            out.extend_from_slice(&issuer);
        }
        _ => return Err(invalid(field, "expected drops or an issued amount")),
    }
    Ok(())
}

/// 64-bit issued value: sign bit, biased exponent, 54-bit mantissa
/// normalized into `[10^15, 10^16)`.
fn issued_value_bits(field: &str, value: &str) -> Result<u64, CodecError> {
    let decimal = Decimal::from_str(value)
        .or_else(|_| Decimal::from_scientific(value))
        .map_err(|_| invalid(field, format!("bad value {value}")))?;
    if decimal.is_zero() {
        return Ok(ISSUED_BIT);
    }

    let mut mantissa = decimal.mantissa().unsigned_abs();
    let mut exponent = -(decimal.scale() as i32);
    while mantissa < MIN_MANTISSA {
        mantissa *= 10;
        exponent -= 1;
    }
    while mantissa >= MAX_MANTISSA {
        if mantissa % 10 != 0 {
            return Err(invalid(field, format!("{value} has more than 16 significant digits")));
        }
        mantissa /= 10;
        exponent += 1;
    }
    if !(MIN_EXPONENT..=MAX_EXPONENT).contains(&exponent) {
        return Err(invalid(field, format!("{value} is out of range")));
    }

    let mut bits = ISSUED_BIT | ((exponent + 97) as u64) << 54 | mantissa as u64;
    if decimal.is_sign_positive() {
        bits |= ISSUED_POSITIVE;
    }
    Ok(bits)
}

/// 20-byte currency: a three-letter code at bytes 12..15, or 40 hex digits.
fn currency_code(field: &str, code: &str) -> Result<[u8; 20], CodecError> {
    let mut out = [0u8; 20];
    if code.len() == 3 && code.is_ascii() && code != "XRP" {
        out[12..15].copy_from_slice(code.as_bytes());
        return Ok(out);
    }
    if code.len() == 40 {
        if let Ok(bytes) = hex::decode(code) {
            out.copy_from_slice(&bytes);
            return Ok(out);
        }
    }
    Err(invalid(field, format!("bad currency {code}")))
}
