// ABOUTME: data_coding values used by the gateway and the matching body encoders
// ABOUTME: UCS-2 text is written as UTF-16 big-endian code units

/// data_coding octet (SMPP v3.4 section 5.2.19).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DataCoding(u8);

impl DataCoding {
    /// SMSC default alphabet
    pub const SMSC_DEFAULT: DataCoding = DataCoding(0x00);
    /// Octet unspecified (8-bit binary)
    pub const OCTET_UNSPECIFIED: DataCoding = DataCoding(0x04);
    /// UCS2 (ISO/IEC-10646)
    pub const UCS2: DataCoding = DataCoding(0x08);

    pub const fn to_byte(self) -> u8 {
        self.0
    }

    pub fn is_ucs2(self) -> bool {
        self == Self::UCS2
    }
}

impl From<u8> for DataCoding {
    fn from(value: u8) -> Self {
        DataCoding(value)
    }
}

/// Encodes text as UCS-2 / UTF-16BE.
pub fn encode_ucs2(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(u16::to_be_bytes).collect()
}

/// Decodes UTF-16BE, replacing malformed units. A trailing odd byte is dropped.
pub fn decode_ucs2(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}
