//! Crate-level error type

use crate::hub::HubError;

/// Error type for relay operations
#[derive(Debug)]
pub enum Error {
    /// I/O error (bind, accept, socket configuration)
    Io(std::io::Error),
    /// Hub lifecycle error
    Hub(HubError),
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "io error: {}", e),
            Error::Hub(e) => write!(f, "hub error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Hub(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<HubError> for Error {
    fn from(e: HubError) -> Self {
        Error::Hub(e)
    }
}
