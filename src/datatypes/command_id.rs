use num_enum::TryFromPrimitive;

/// command_id values for the PDUs the gateway decodes or emits.
#[derive(TryFromPrimitive)]
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CommandId {
    GenericNack = 0x8000_0000,
    BindReceiver = 0x0000_0001,
    BindReceiverResp = 0x8000_0001,
    BindTransmitter = 0x0000_0002,
    BindTransmitterResp = 0x8000_0002,
    SubmitSm = 0x0000_0004,
    SubmitSmResp = 0x8000_0004,
    DeliverSm = 0x0000_0005,
    DeliverSmResp = 0x8000_0005,
    Unbind = 0x0000_0006,
    UnbindResp = 0x8000_0006,
    BindTransceiver = 0x0000_0009,
    BindTransceiverResp = 0x8000_0009,
    EnquireLink = 0x0000_0015,
    EnquireLinkResp = 0x8000_0015,
}

impl CommandId {
    /// The response id paired with a request id.
    pub fn response(self) -> Option<CommandId> {
        CommandId::try_from(self as u32 | 0x8000_0000)
            .ok()
            .filter(|id| *id != self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_ids_set_high_bit() {
        assert_eq!(CommandId::SubmitSm.response(), Some(CommandId::SubmitSmResp));
        assert_eq!(
            CommandId::BindTransceiver.response(),
            Some(CommandId::BindTransceiverResp)
        );
        assert_eq!(CommandId::SubmitSmResp.response(), None);
    }

    #[test]
    fn unknown_command_id_is_rejected() {
        assert!(CommandId::try_from(0x0000_000Au32).is_err());
        assert_eq!(CommandId::try_from(0x15u32).ok(), Some(CommandId::EnquireLink));
    }
}
