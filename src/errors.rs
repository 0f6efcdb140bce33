use std::path::PathBuf;
use thiserror::Error;

use crate::descriptor::FXY;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV Error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Table not found: {0}")]
    TableNotFound(PathBuf),

    #[error("File is not a valid BUFR message: {0}")]
    MalformedMessage(String),

    #[error("Message truncated: sections declare {declared} bytes, buffer holds {available}")]
    TruncatedMessage { declared: usize, available: usize },

    #[error("Descriptor {0} not found in tables")]
    UnknownDescriptor(FXY),

    #[error("Unknown operator descriptor {0}")]
    UnknownModifier(FXY),

    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(&'static str),

    #[error("Bitstream read past end of buffer (at bit {position}, wanted {wanted} bits of {length})")]
    OutOfRange {
        position: usize,
        wanted: usize,
        length: usize,
    },

    #[error("Descriptor recursion deeper than {0} levels")]
    RecursionLimit(usize),

    #[error("Unsupported BUFR edition: {0}")]
    UnsupportedEdition(u8),

    #[error("Parse Error: {0}")]
    ParseError(String),

    #[error("File is not a valid BUFR file")]
    Nom(String),
}

impl<'a> From<nom::Err<nom::error::Error<&'a [u8]>>> for Error {
    fn from(value: nom::Err<nom::error::Error<&'a [u8]>>) -> Self {
        Self::Nom(value.to_string())
    }
}

impl<'a> From<nom::Err<nom::error::Error<(&'a [u8], usize)>>> for Error {
    fn from(value: nom::Err<nom::error::Error<(&'a [u8], usize)>>) -> Self {
        Self::Nom(value.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
