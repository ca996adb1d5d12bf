//! The block device abstraction the file system is built on.
//!
//! A disk is an external collaborator: a sequence of fixed-size blocks,
//! created/opened/closed by name and transferred one block at a time.
//! [`BlockDevice`] mixes no-`self` lifecycle functions (`make_disk`,
//! `open_disk`) with instance methods (`block_read`, `block_write`) on a
//! single trait.
//!
//! Two implementations are provided: [`MemDisk`], an in-memory device used
//! by every test in this crate, and [`FileDisk`], a real file on the host
//! file system.

use std::collections::HashMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Mutex;

/// Size, in bytes, of every block on the disk. Part of the on-disk
/// contract; shared between the block device and the file system core.
pub const BLOCK_SIZE: usize = 4096;

/// A fixed-size unit of disk I/O.
pub type Block = [u8; BLOCK_SIZE];

/// A disk made of fixed-size blocks, created/opened/closed by name.
///
/// Block numbers cover both the metadata region and the data region; the
/// file system core is the only caller that knows the difference.
pub trait BlockDevice: Sized {
    /// The error type this device's operations can fail with.
    type Error: fmt::Debug + fmt::Display;

    /// Creates a new disk of `total_blocks` blocks under `name`. Does not
    /// open it.
    fn make_disk(name: &str, total_blocks: u32) -> Result<(), Self::Error>;

    /// Opens a previously created disk for block I/O.
    fn open_disk(name: &str) -> Result<Self, Self::Error>;

    /// Closes the disk. The handle is consumed; no further I/O may occur
    /// through it.
    fn close_disk(self) -> Result<(), Self::Error>;

    /// Reads exactly one block into `buf`.
    fn block_read(&mut self, block_num: u32, buf: &mut Block) -> Result<(), Self::Error>;

    /// Writes exactly one block from `buf`.
    fn block_write(&mut self, block_num: u32, buf: &Block) -> Result<(), Self::Error>;
}

/// An in-memory [`BlockDevice`], keyed by disk name in a process-wide
/// registry so that `make_disk` followed by a later `open_disk` observes
/// the same blocks, the same way two `open()` calls against a real file
/// would. This is the device every test in this crate mounts against.
pub struct MemDisk {
    name: String,
}

static REGISTRY: Mutex<Option<HashMap<String, Vec<Block>>>> = Mutex::new(None);

fn with_registry<R>(f: impl FnOnce(&mut HashMap<String, Vec<Block>>) -> R) -> R {
    let mut guard = REGISTRY.lock().unwrap();
    let map = guard.get_or_insert_with(HashMap::new);
    f(map)
}

impl BlockDevice for MemDisk {
    type Error = MemDiskError;

    fn make_disk(name: &str, total_blocks: u32) -> Result<(), Self::Error> {
        with_registry(|map| {
            map.insert(name.to_string(), vec![[0u8; BLOCK_SIZE]; total_blocks as usize]);
        });
        Ok(())
    }

    fn open_disk(name: &str) -> Result<Self, Self::Error> {
        let exists = with_registry(|map| map.contains_key(name));
        if !exists {
            return Err(MemDiskError::NoSuchDisk);
        }
        Ok(MemDisk { name: name.to_string() })
    }

    fn close_disk(self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn block_read(&mut self, block_num: u32, buf: &mut Block) -> Result<(), Self::Error> {
        with_registry(|map| {
            let blocks = map.get(&self.name).ok_or(MemDiskError::NoSuchDisk)?;
            let block = blocks.get(block_num as usize).ok_or(MemDiskError::OutOfRange)?;
            buf.copy_from_slice(block);
            Ok(())
        })
    }

    fn block_write(&mut self, block_num: u32, buf: &Block) -> Result<(), Self::Error> {
        with_registry(|map| {
            let blocks = map.get_mut(&self.name).ok_or(MemDiskError::NoSuchDisk)?;
            let block = blocks.get_mut(block_num as usize).ok_or(MemDiskError::OutOfRange)?;
            block.copy_from_slice(buf);
            Ok(())
        })
    }
}

/// Errors a [`MemDisk`] can fail with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemDiskError {
    /// No disk with the given name has been created yet.
    NoSuchDisk,
    /// A block index was outside `0..total_blocks`.
    OutOfRange,
}

impl fmt::Display for MemDiskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemDiskError::NoSuchDisk => write!(f, "no such disk"),
            MemDiskError::OutOfRange => write!(f, "block index out of range"),
        }
    }
}

/// A [`BlockDevice`] backed by a real file on the host file system. `name`
/// is the path to the file; `make_disk` creates it pre-sized to
/// `total_blocks * BLOCK_SIZE` bytes, matching what `original_source/fs.c`
/// expects from its `disk.h` driver.
pub struct FileDisk {
    file: File,
}

impl BlockDevice for FileDisk {
    type Error = std::io::Error;

    fn make_disk(name: &str, total_blocks: u32) -> Result<(), Self::Error> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(name)?;
        file.set_len(total_blocks as u64 * BLOCK_SIZE as u64)
    }

    fn open_disk(name: &str) -> Result<Self, Self::Error> {
        let file = OpenOptions::new().read(true).write(true).open(name)?;
        Ok(FileDisk { file })
    }

    fn close_disk(self) -> Result<(), Self::Error> {
        drop(self.file);
        Ok(())
    }

    fn block_read(&mut self, block_num: u32, buf: &mut Block) -> Result<(), Self::Error> {
        self.file.seek(SeekFrom::Start(block_num as u64 * BLOCK_SIZE as u64))?;
        self.file.read_exact(buf)
    }

    fn block_write(&mut self, block_num: u32, buf: &Block) -> Result<(), Self::Error> {
        self.file.seek(SeekFrom::Start(block_num as u64 * BLOCK_SIZE as u64))?;
        self.file.write_all(buf)
    }
}
