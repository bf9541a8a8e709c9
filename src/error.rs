use thiserror::Error;

use crate::topology::{Role, Topology};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can go wrong between a port token and a control transfer.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    InvalidPort(#[from] InvalidPort),

    #[error("no hub found at position {ordinal}")]
    NotFound { ordinal: usize },

    #[error("{op} failed: {source}")]
    Usb {
        op: &'static str,
        #[source]
        source: rusb::Error,
    },

    #[error("{op}: expected {expected} bytes, got {actual}")]
    ShortTransfer {
        op: &'static str,
        expected: usize,
        actual: usize,
    },
}

impl Error {
    pub(crate) fn usb(op: &'static str) -> impl FnOnce(rusb::Error) -> Self {
        move |source| Error::Usb { op, source }
    }
}

/// A port token that does not follow the `<role letter><1..4>` grammar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty port name")]
    Empty,

    #[error("unknown hub letter '{letter}', expected {expected}")]
    UnknownRole { letter: char, expected: String },

    #[error("port number missing after '{letter}'")]
    MissingNumber { letter: char },

    #[error("'{text}' is not a port number")]
    NotANumber { text: String },

    #[error("port number {number} is out of range, must be 1, 2, 3, or 4")]
    OutOfRange { number: u32 },
}

/// A logical port whose role does not exist on the selected board layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{role:?} ports do not exist on the {topology} layout")]
pub struct InvalidPort {
    pub role: Role,
    pub topology: Topology,
}
