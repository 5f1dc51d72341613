use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NhdpError {
    #[error("domain extension {0} already registered")]
    DomainExists(u8),

    #[error("no room for another domain (maximum {0})")]
    TooManyDomains(usize),

    #[error("unknown interface '{0}'")]
    UnknownInterface(String),

    #[error("interface '{0}' already registered")]
    InterfaceExists(String),
}
