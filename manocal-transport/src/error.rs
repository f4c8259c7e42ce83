//! Transport errors

use std::io;
use std::time::Duration;

use crate::{Endpoint, LinkHandle};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Connection timeout after {0:?}")]
    ConnectionTimeout(Duration),

    #[error("Discovery timeout after {0:?}")]
    DiscoveryTimeout(Duration),

    #[error("Subscription timeout after {0:?}")]
    SubscriptionTimeout(Duration),

    #[error("Read timeout after {0:?}")]
    ReadTimeout(Duration),

    #[error("Write timeout after {0:?}")]
    WriteTimeout(Duration),

    #[error("Endpoint {0} not found on device")]
    EndpointNotFound(Endpoint),

    /// The link dropped out from under an operation. Distinguished from
    /// generic failure so callers can skip pointless retries.
    #[error("Link disconnected")]
    Disconnected,

    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("Stale link handle: {0}")]
    StaleHandle(LinkHandle),

    #[error("Reference controller: {0}")]
    ReferenceController(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Check if the error means the link is gone (retrying the same
    /// operation cannot succeed)
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected | Self::StaleHandle(_))
    }

    /// Check if the error is a timeout of some kind
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout(_)
                | Self::DiscoveryTimeout(_)
                | Self::SubscriptionTimeout(_)
                | Self::ReadTimeout(_)
                | Self::WriteTimeout(_)
        )
    }
}
