use thiserror::Error;

#[derive(Error, Debug)]
pub enum StagingError {
    #[error("Staging I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed staged record: {0}")]
    Codec(#[from] CodecError),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("record truncated while reading {0}")]
    Truncated(&'static str),

    #[error("negative {0}")]
    Negative(&'static str),

    #[error("string length prefix is malformed")]
    BadLength,

    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    #[error("{0} trailing bytes after record")]
    TrailingBytes(usize),
}
