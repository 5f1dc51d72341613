use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("input truncated")]
    Truncated,

    #[error("unsupported packet version {0}")]
    BadVersion(u8),

    #[error("message size field {size} does not fit remaining {remaining} bytes")]
    BadMessageSize { size: usize, remaining: usize },

    #[error("TLV block length {length} exceeds containing structure")]
    BadTlvBlockLength { length: usize },

    #[error("malformed TLV: {0}")]
    BadTlv(&'static str),

    #[error("malformed address block: {0}")]
    BadAddressBlock(&'static str),

    #[error("unsupported address length {0}")]
    BadAddressLength(u8),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("message larger than 65535 bytes")]
    MessageTooLarge,

    #[error("address family does not match message address length")]
    AddressFamilyMismatch,

    #[error("TLV value larger than 65535 bytes")]
    TlvValueTooLarge,

    #[error("message needs at least one address")]
    NoAddresses,
}
