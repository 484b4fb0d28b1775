use thiserror::Error;

pub type Result<A, E = CodecError> = std::result::Result<A, E>;

/// Error kinds a caller of `Writer`/`Reader` can distinguish between.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("end of stream while reading a value")]
    EndOfStream,

    #[error("tag byte {0} is not valid in this field context")]
    MalformedTag(u8),

    #[error("{0}: code units do not form valid UTF-16")]
    InvalidString(&'static str),

    #[error("handle refers to stream position {0}, which was never registered")]
    UnresolvedHandle(u64),

    #[error("class-name registry has no class registered under code {0}")]
    UnknownClass(u32),

    #[error("could not instantiate `{0}`: no default constructor and no custom instantiator")]
    InstantiationFailed(String),

    #[error("field access rejected by class reflector: {0}")]
    IllegalFieldAccess(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
