use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Olsrv2Error {
    #[error("invalid locally attached network: {0}")]
    BadLan(String),

    #[error("unknown domain extension {0}")]
    UnknownDomain(u8),
}

/// Errors of the kernel route channel.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    /// The request was interrupted by a newer routing run; reverts are
    /// silent.
    #[error("request cancelled")]
    Cancelled,

    #[error("kernel rejected the request: {0}")]
    Kernel(i32),

    #[error("route channel closed")]
    ChannelClosed,
}
