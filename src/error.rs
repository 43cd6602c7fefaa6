//! Error taxonomy for the safe core. The library only ever returns these as
//! values; translating them into exit codes and user-facing text is the
//! CLI binary's job (see `src/main.rs`).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("safe data is malformed: {0}")]
    SafeFormat(String),

    #[error("not a quietsafe file (unrecognized `type`)")]
    WrongMagic,

    #[error("operation requires a key the opened capability does not have")]
    MissingKey,

    #[error("no safe found at {0}")]
    SafeNotFound(std::path::PathBuf),

    #[error("a safe already exists at {0}")]
    SafeAlreadyExists(std::path::PathBuf),

    #[error("safe at {0} is locked by another process")]
    SafeLocked(std::path::PathBuf),

    #[error("at most six containers are supported per safe")]
    TooManyContainers,

    #[error("no free blocks remain for a new container")]
    OutOfBlocks,

    #[error("unsafe parameter used without an explicit override")]
    UnsafeParameter(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("cryptographic failure: {0}")]
    Crypto(String),
}

pub type Result<T> = std::result::Result<T, Error>;
