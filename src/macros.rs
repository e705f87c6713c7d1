// ABOUTME: Macros that cut boilerplate out of the gateway's PDU implementations
// ABOUTME: Header-only codecs, optional TLV encode/decode, and builder setters

/// Implements `Encodable`/`Decodable` for a PDU that is only a header.
///
/// The struct must carry `command_status` and `sequence_number` fields.
macro_rules! impl_header_only_pdu {
    ($pdu_type:ident, $command_id:expr) => {
        impl $crate::codec::Decodable for $pdu_type {
            fn command_id() -> $crate::datatypes::CommandId {
                $command_id
            }

            fn decode(
                header: $crate::codec::PduHeader,
                buf: &mut std::io::Cursor<&[u8]>,
            ) -> Result<Self, $crate::codec::CodecError> {
                use bytes::Buf;

                Self::validate_header(&header)?;

                if buf.has_remaining() {
                    return Err($crate::codec::CodecError::FieldValidation {
                        field: concat!(stringify!($pdu_type), "_body"),
                        reason: concat!(stringify!($pdu_type), " PDU should have no body")
                            .to_string(),
                    });
                }

                Ok($pdu_type {
                    command_status: header.command_status,
                    sequence_number: header.sequence_number,
                })
            }
        }

        impl $crate::codec::Encodable for $pdu_type {
            fn encode(&self, buf: &mut bytes::BytesMut) -> Result<(), $crate::codec::CodecError> {
                let header = $crate::codec::PduHeader {
                    command_length: $crate::codec::PduHeader::SIZE as u32,
                    command_id: $command_id,
                    command_status: self.command_status,
                    sequence_number: self.sequence_number,
                };
                header.encode(buf);
                Ok(())
            }

            fn encoded_size(&self) -> usize {
                $crate::codec::PduHeader::SIZE
            }
        }
    };
}

/// Encodes every listed `Option<Tlv>` field that is set.
macro_rules! encode_optional_tlvs {
    ($self_expr:expr, $buf_expr:expr, $($field:ident),* $(,)?) => {
        $(
            if let Some(ref tlv) = $self_expr.$field {
                tlv.encode($buf_expr)?;
            }
        )*
    };
}

/// Reads TLVs until the body is exhausted and routes each one to the field
/// registered for its tag. Unrecognised tags are skipped.
macro_rules! decode_optional_tlvs {
    ($buf_expr:expr, $pdu_name:literal, { $($tag:path => $field:ident),* $(,)? }) => {{
        use bytes::Buf as _;
        $(let mut $field: Option<$crate::datatypes::Tlv> = None;)*
        while $buf_expr.has_remaining() {
            let tlv = $crate::datatypes::Tlv::decode($buf_expr)?;
            match tlv.tag {
                $($tag => $field = Some(tlv),)*
                other => tracing::debug!(
                    tag = format_args!("{:#06x}", other),
                    pdu = $pdu_name,
                    "ignoring unsupported optional parameter"
                ),
            }
        }
        ($($field),*)
    }};
}

/// Fluent setters for builder structs.
macro_rules! builder_setters {
    ($($field:ident: $type:ty),* $(,)?) => {
        $(
            pub fn $field(mut self, $field: $type) -> Self {
                self.$field = $field;
                self
            }
        )*
    };
}

/// `new(sequence_number)` and `error(sequence_number, status)` for
/// header-only PDUs.
macro_rules! impl_header_only_constructors {
    ($pdu_type:ident) => {
        impl $pdu_type {
            /// Create a new PDU with Ok status
            pub fn new(sequence_number: u32) -> Self {
                Self {
                    command_status: $crate::datatypes::CommandStatus::Ok,
                    sequence_number,
                }
            }

            /// Create a PDU with error status
            pub fn error(sequence_number: u32, status: $crate::datatypes::CommandStatus) -> Self {
                Self {
                    command_status: status,
                    sequence_number,
                }
            }
        }
    };
}

/// Codec plus constructors for a header-only PDU.
macro_rules! impl_complete_header_only_pdu {
    ($pdu_type:ident, $command_id:expr) => {
        $crate::macros::impl_header_only_pdu!($pdu_type, $command_id);
        $crate::macros::impl_header_only_constructors!($pdu_type);
    };
}

pub(crate) use {
    builder_setters, decode_optional_tlvs, encode_optional_tlvs, impl_complete_header_only_pdu,
    impl_header_only_constructors, impl_header_only_pdu,
};
