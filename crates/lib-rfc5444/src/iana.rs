//! IANA-assigned numbers for the message types and TLVs used by NHDP
//! (RFC 6130) and OLSRv2 (RFC 7181).

/// The well-known MANET port for RFC 5444 packets.
pub const MANET_PORT: u16 = 269;

/* message types */
pub const MSGTYPE_HELLO: u8 = 0;
pub const MSGTYPE_TC: u8 = 1;

/* message TLV types */
pub const MSGTLV_INTERVAL_TIME: u8 = 0;
pub const MSGTLV_VALIDITY_TIME: u8 = 1;
pub const MSGTLV_MPR_WILLING: u8 = 7;
pub const MSGTLV_CONT_SEQ_NUM: u8 = 8;

/* address block TLV types */
pub const ADDRTLV_INTERVAL_TIME: u8 = 0;
pub const ADDRTLV_VALIDITY_TIME: u8 = 1;
pub const ADDRTLV_LOCAL_IF: u8 = 2;
pub const ADDRTLV_LINK_STATUS: u8 = 3;
pub const ADDRTLV_OTHER_NEIGHB: u8 = 4;
pub const ADDRTLV_LINK_METRIC: u8 = 7;
pub const ADDRTLV_MPR: u8 = 8;
pub const ADDRTLV_NBR_ADDR_TYPE: u8 = 9;
pub const ADDRTLV_GATEWAY: u8 = 10;

/* LOCAL_IF TLV values */
pub const LOCALIF_THIS_IF: u8 = 0;
pub const LOCALIF_OTHER_IF: u8 = 1;

/* LINK_STATUS TLV values */
pub const LINKSTATUS_LOST: u8 = 0;
pub const LINKSTATUS_SYMMETRIC: u8 = 1;
pub const LINKSTATUS_HEARD: u8 = 2;

/* OTHER_NEIGHB TLV values */
pub const OTHERNEIGHB_LOST: u8 = 0;
pub const OTHERNEIGHB_SYMMETRIC: u8 = 1;

/* MPR TLV values */
pub const MPR_FLOODING: u8 = 1;
pub const MPR_ROUTING: u8 = 2;
pub const MPR_FLOOD_ROUTE: u8 = 3;

/* NBR_ADDR_TYPE TLV values */
pub const NBR_ADDR_TYPE_ORIGINATOR: u8 = 1;
pub const NBR_ADDR_TYPE_ROUTABLE: u8 = 2;
pub const NBR_ADDR_TYPE_ROUTABLE_ORIG: u8 = 3;

/* willingness */
pub const WILLINGNESS_NEVER: u8 = 0;
pub const WILLINGNESS_DEFAULT: u8 = 7;
pub const WILLINGNESS_ALWAYS: u8 = 15;

/* LINK_METRIC direction flags, high nibble of the 16-bit TLV value */
pub const LINKMETRIC_INCOMING_LINK: u16 = 0x8000;
pub const LINKMETRIC_OUTGOING_LINK: u16 = 0x4000;
pub const LINKMETRIC_INCOMING_NEIGH: u16 = 0x2000;
pub const LINKMETRIC_OUTGOING_NEIGH: u16 = 0x1000;
pub const LINKMETRIC_COST_MASK: u16 = 0x0fff;
