//! The `yfsd` file system engine: on-disk caches, pathname resolution,
//! directory operations, and the request dispatch loop, assembled behind
//! [`Engine`] and [`Dispatcher`].

pub mod blocks;
pub mod device;
pub mod dirent;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod freelist;
pub mod inode_cache;
pub mod ops;
pub mod path;
pub mod transport;

pub use dispatch::Dispatcher;
pub use engine::Engine;
pub use error::{EngineError, EngineResult};
