//! Error codes of the protocol translator API, carried in the `code` of JSON-RPC error responses.
use edge_rpc::ErrorDetails;
use strum::{EnumIter, FromRepr, IntoEnumIterator};
use thiserror::Error;

/// A protocol translator API failure.
///
/// The discriminant is the code that goes on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Error, EnumIter, FromRepr)]
#[repr(i32)]
pub enum PtApiError {
    #[error("Unknown PT API error")]
    UnknownError = -1,
    #[error("Protocol translator API internal error")]
    InternalError = -30000,
    #[error("Protocol translator not registered")]
    ProtocolTranslatorNotRegistered = -30001,
    #[error("Protocol translator already registered")]
    ProtocolTranslatorAlreadyRegistered = -30002,
    #[error("Protocol translator name reserved")]
    ProtocolTranslatorNameReserved = -30003,
    #[error("Maximum number of registered endpoints already in use")]
    RegisteredEndpointLimitReached = -30004,
    #[error("Endpoint already registered")]
    EndpointAlreadyRegistered = -30005,
    #[error("Protocol translator client write error")]
    ProtocolTranslatorClientWriteError = -30100,
    #[error("Illegal value")]
    IllegalValue = -30101,
    #[error("Resource not found")]
    ResourceNotFound = -30102,
    #[error("Invalid JSON structure")]
    InvalidJsonStructure = -30103,
}

impl PtApiError {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Every known code, in declaration order
    pub fn all() -> impl Iterator<Item = Self> {
        Self::iter()
    }

    /// The PT API error a JSON-RPC error object carries, if its code is one of ours
    pub fn of_error_details(details: &ErrorDetails) -> Option<Self> {
        Self::from_repr(details.code.code())
    }
}

impl TryFrom<i32> for PtApiError {
    /// The code that didn't match any PT API error
    type Error = i32;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        Self::from_repr(code).ok_or(code)
    }
}

impl From<PtApiError> for ErrorDetails {
    fn from(error: PtApiError) -> Self {
        ErrorDetails::server_error(error.code(), error.to_string(), None)
    }
}
