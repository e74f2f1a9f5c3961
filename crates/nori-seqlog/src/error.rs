use std::convert::Infallible;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("A file for this handle is already open")]
    AlreadyOpen,

    #[error("No file for this handle is open")]
    NotOpen,

    #[error("Invalid type: expected number or string, got {0}")]
    InvalidType(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Expected {} to be a regular file", .0.display())]
    NotAFile(PathBuf),
}

impl From<Infallible> for Error {
    fn from(never: Infallible) -> Self {
        match never {}
    }
}

pub type Result<T> = std::result::Result<T, Error>;
