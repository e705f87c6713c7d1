// ABOUTME: esm_class bitfield as carried by submit_sm and deliver_sm
// ABOUTME: Message type bits (delivery receipt) and the UDHI feature bit

/// esm_class octet. Bits 5..2 carry the message type, bit 6 the UDHI flag.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct EsmClass(u8);

impl EsmClass {
    /// Bit 2: message type "SMSC delivery receipt"
    pub const DELIVERY_RECEIPT: u8 = 0x04;
    /// Bit 6: short_message starts with a User Data Header
    pub const UDHI: u8 = 0x40;
    const MESSAGE_TYPE_MASK: u8 = 0x3C;

    pub const fn new(value: u8) -> Self {
        Self(value)
    }

    pub const fn delivery_receipt() -> Self {
        Self(Self::DELIVERY_RECEIPT)
    }

    pub const fn with_udhi(self) -> Self {
        Self(self.0 | Self::UDHI)
    }

    pub const fn has_udhi(self) -> bool {
        self.0 & Self::UDHI != 0
    }

    pub const fn is_delivery_receipt(self) -> bool {
        self.0 & Self::MESSAGE_TYPE_MASK == Self::DELIVERY_RECEIPT
    }

    pub const fn to_byte(self) -> u8 {
        self.0
    }
}

impl From<u8> for EsmClass {
    fn from(value: u8) -> Self {
        Self(value)
    }
}
