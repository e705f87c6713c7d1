use chrono::{DateTime, Utc};

/// Message ids on the wire: lowercase hex, zero padded to seven digits.
pub fn format_as_hex(message_id: u64) -> String {
    format!("{message_id:07x}")
}

pub fn format_as_hex_uppercase(message_id: u64) -> String {
    format!("{message_id:07X}")
}

pub fn format_as_dec(message_id: u64) -> String {
    message_id.to_string()
}

/// Inverse of [`format_as_hex`]; accepts either case.
pub fn parse_hex(message_id: &str) -> Option<u64> {
    u64::from_str_radix(message_id, 16).ok()
}

/// Low sixteen bits, big-endian.
pub fn to_unsigned_short(value: u32) -> [u8; 2] {
    ((value & 0xFFFF) as u16).to_be_bytes()
}

/// Low eight bits.
pub fn to_unsigned_byte(value: u32) -> u8 {
    (value & 0xFF) as u8
}

/// `yyMMddHHmm` as used in receipt bodies; zeros when the date is unknown.
pub fn receipt_date(date: Option<DateTime<Utc>>) -> String {
    match date {
        Some(date) => date.format("%y%m%d%H%M").to_string(),
        None => "0000000000".to_string(),
    }
}
