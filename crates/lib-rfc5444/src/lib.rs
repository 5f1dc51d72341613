//! RFC 5444 message framing for the wisp daemon.
//!
//! This is not a general-purpose RFC 5444 library: it implements the
//! container format exactly as far as NHDP HELLO and OLSRv2 TC messages
//! need it. Packets carry messages, messages carry a TLV block and
//! compressed address blocks with their own TLV blocks. The [`reader`]
//! module dispatches decoded messages to prioritized consumers, the
//! [`writer`] module composes messages from collected addresses and TLV
//! values, and [`dup_set`] provides the sequence-number duplicate
//! detection both protocols rely on.

pub mod addr_block;
pub mod dup_set;
pub mod error;
pub mod iana;
pub mod metric;
pub mod msg;
pub mod packet;
pub mod reader;
pub mod time_tlv;
pub mod tlv;
pub mod writer;

pub use addr_block::AddrBlock;
pub use dup_set::{DupResult, DuplicateSet};
pub use error::{EncodeError, ParseError};
pub use msg::Message;
pub use packet::{Packet, PacketMeta};
pub use reader::{AddressContext, Consumer, MessageContext, TlvSet, TlvSpec, Verdict};
pub use tlv::Tlv;
pub use writer::{MessageBuilder, PacketBuilder};
