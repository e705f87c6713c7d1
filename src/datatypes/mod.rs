mod bind;
mod command_id;
mod command_status;
mod data_coding;
mod deliver_sm;
mod enquire_link;
mod esm_class;
mod generic_nack;
mod message_state;
mod numeric_plan_indicator;
mod short_message;
mod submit_sm;
mod tlv;
mod type_of_number;
mod unbind;

pub use bind::{Bind, BindBuilder, BindResponse, BindType, SMPP_V34};
pub use command_id::CommandId;
pub use command_status::CommandStatus;
pub use data_coding::{DataCoding, decode_ucs2, encode_ucs2};
pub use deliver_sm::{DeliverSm, DeliverSmBuilder, DeliverSmResponse};
pub use enquire_link::{EnquireLink, EnquireLinkResponse};
pub use esm_class::EsmClass;
pub use generic_nack::GenericNack;
pub use message_state::MessageState;
pub use numeric_plan_indicator::NumericPlanIndicator;
pub use short_message::{MAX_SHORT_MESSAGE_LENGTH, MessageValidationError};
pub use submit_sm::{SubmitSm, SubmitSmBuilder, SubmitSmResponse};
pub use tlv::{Tlv, tags};
pub use type_of_number::TypeOfNumber;
pub use unbind::{Unbind, UnbindResponse};
