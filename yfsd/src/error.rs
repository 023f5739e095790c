//! The engine's internal error taxonomy.
//!
//! Every engine operation returns `Result<T, EngineError>`; the dispatcher
//! is the only place that flattens this down to the wire's single `ERROR`
//! sentinel.

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("path component not found")]
    NotFound,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("not a regular file")]
    NotRegularFile,
    #[error("entry already exists")]
    AlreadyExists,
    #[error("directory not empty")]
    DirectoryNotEmpty,
    #[error("no free inodes")]
    NoFreeInodes,
    #[error("no free blocks")]
    NoFreeBlocks,
    #[error("too many symlink expansions")]
    TooManySymlinks,
    #[error("path name too long")]
    PathTooLong,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("cross-address-space copy failed")]
    Copy,
    #[error("device I/O error: {0}")]
    Io(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
