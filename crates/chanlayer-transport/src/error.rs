use crate::EndpointAddr;

/// Errors returned by the in-process transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid endpoint address: {0}")]
    InvalidEndpoint(String),

    #[error("endpoint {0} already has a bound publisher")]
    AddressInUse(EndpointAddr),

    #[error("high-water mark must be at least 1")]
    InvalidHighWaterMark,

    #[error("socket is closed")]
    Closed,
}
