//! `microfat` is a small, self-contained FAT-style file system that lives
//! inside a single fixed-size backing "disk" — an addressable array of
//! equal-sized blocks exposed by the [`BlockDevice`] trait.
//!
//! It provides a flat namespace of named files, random-access read/write
//! with byte-granular offsets, and persistence of metadata and data across
//! mount/unmount cycles. The block device implementation itself, a CLI,
//! concurrency across processes, journaling and hierarchical directories
//! are out of scope.

pub mod block;
pub mod directory;
pub mod fat;
pub mod fs;
pub mod handle;

pub use block::{BlockDevice, BLOCK_SIZE};
pub use fs::FileSystem;
pub use handle::Fd;

use core::fmt;

/// Every error this crate's public API can return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsError {
    /// A file-I/O operation was attempted without a preceding successful
    /// [`FileSystem::mount`].
    NotMounted,
    /// A filename was empty, too long (including its NUL terminator) or
    /// contained an embedded NUL.
    InvalidName,
    /// [`FileSystem::create`] was called with a name that already exists.
    NameConflict,
    /// [`FileSystem::delete`] or [`FileSystem::open`] was called with a
    /// name that does not exist.
    NotFound,
    /// The directory table or the handle table has no free slot.
    TableFull,
    /// [`FileSystem::delete`] was called on a file with an open handle.
    Busy,
    /// A handle index was out of range or referred to a closed slot.
    BadFd,
    /// A seek went out of bounds, or a truncate grew the file.
    BadOffset,
    /// The underlying block device reported a failure.
    Device(String),
}

/// The result type used throughout this crate.
pub type Result<T> = core::result::Result<T, FsError>;

#[rustfmt::skip]
impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsError::NotMounted   => write!(f, "file system is not mounted"),
            FsError::InvalidName  => write!(f, "invalid file name"),
            FsError::NameConflict => write!(f, "a file with that name already exists"),
            FsError::NotFound     => write!(f, "no such file"),
            FsError::TableFull    => write!(f, "no free slot in the directory or handle table"),
            FsError::Busy         => write!(f, "file has an open handle"),
            FsError::BadFd        => write!(f, "bad file descriptor"),
            FsError::BadOffset    => write!(f, "offset out of bounds"),
            FsError::Device(msg)  => write!(f, "block device error: {msg}"),
        }
    }
}

impl std::error::Error for FsError {}
