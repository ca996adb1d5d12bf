//! The flat directory table: a fixed-capacity array of named file
//! entries, one block wide on disk.
//!
//! An empty slot is its own [`DirSlot::Unused`] variant instead of a
//! sentinel name or a parallel `used: bool` array, so a free slot can
//! never be mistaken for a file named with an empty string.

use crate::block::{Block, BlockDevice, BLOCK_SIZE};
use crate::fat::{FatEntry, FAT_BLOCKS};
use crate::{FsError, Result};
use byteorder::{ByteOrder, LittleEndian};
use log::debug;

/// Maximum number of files the directory table can hold at once.
pub const MAX_FILES: usize = 64;

/// Width, in bytes, of the on-disk name field, including its NUL
/// terminator. A name may use at most `MAX_FILENAME - 1` bytes.
pub const MAX_FILENAME: usize = 16;

/// Physical block the directory table lives in: immediately after the
/// FAT's `FAT_BLOCKS` blocks.
pub const DIRECTORY_BLOCK: u32 = FAT_BLOCKS;

/// Total number of metadata blocks: the FAT plus the one directory
/// block. Data block `k` lives at physical block `k + META_BLOCKS`.
pub const META_BLOCKS: u32 = FAT_BLOCKS + 1;

const ENTRY_BYTES: usize = MAX_FILENAME + 4 + 4; // name + size + first_block

/// One slot of the directory table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirSlot {
    /// The slot holds no file.
    Unused,
    /// The slot names a file.
    Used {
        /// The file's name, NUL-padded to fill the on-disk field width;
        /// an unused slot is distinguished by a leading NUL, not by this
        /// variant, so a real name's first byte is never zero.
        name: [u8; MAX_FILENAME],
        /// The file's size in bytes.
        size: u32,
        /// The first block of the file's chain, or `Free` for an
        /// empty (zero-length) file.
        first_block: FatEntry,
    },
}

/// The in-memory directory table, loaded in full at mount time and
/// flushed in full at unmount.
pub struct Directory {
    slots: Vec<DirSlot>,
}

impl Directory {
    /// An all-empty table, used when formatting a fresh disk.
    pub fn new_empty() -> Self {
        Directory { slots: vec![DirSlot::Unused; MAX_FILES] }
    }

    /// Reads the directory table off `device`'s `DIRECTORY_BLOCK`.
    pub fn load<D: BlockDevice>(device: &mut D) -> Result<Self> {
        let mut block: Block = [0u8; BLOCK_SIZE];
        device
            .block_read(DIRECTORY_BLOCK, &mut block)
            .map_err(|e| FsError::Device(e.to_string()))?;
        let mut slots = Vec::with_capacity(MAX_FILES);
        for i in 0..MAX_FILES {
            let base = i * ENTRY_BYTES;
            let mut name = [0u8; MAX_FILENAME];
            name.copy_from_slice(&block[base..base + MAX_FILENAME]);
            if name[0] == 0 {
                slots.push(DirSlot::Unused);
                continue;
            }
            let size = LittleEndian::read_u32(&block[base + MAX_FILENAME..base + MAX_FILENAME + 4]);
            let first_raw = LittleEndian::read_i32(
                &block[base + MAX_FILENAME + 4..base + MAX_FILENAME + 8],
            );
            slots.push(DirSlot::Used {
                name,
                size,
                first_block: match first_raw {
                    -2 => FatEntry::Free,
                    -1 => FatEntry::End,
                    n => FatEntry::Next(n as u32),
                },
            });
        }
        Ok(Directory { slots })
    }

    /// Writes the directory table back to `DIRECTORY_BLOCK`.
    pub fn save<D: BlockDevice>(&self, device: &mut D) -> Result<()> {
        let mut block: Block = [0u8; BLOCK_SIZE];
        for (i, slot) in self.slots.iter().enumerate() {
            let base = i * ENTRY_BYTES;
            if let DirSlot::Used { name, size, first_block } = slot {
                block[base..base + MAX_FILENAME].copy_from_slice(name);
                LittleEndian::write_u32(&mut block[base + MAX_FILENAME..base + MAX_FILENAME + 4], *size);
                let raw = match first_block {
                    FatEntry::Free => -2,
                    FatEntry::End => -1,
                    FatEntry::Next(n) => *n as i32,
                };
                LittleEndian::write_i32(&mut block[base + MAX_FILENAME + 4..base + MAX_FILENAME + 8], raw);
            }
        }
        device
            .block_write(DIRECTORY_BLOCK, &block)
            .map_err(|e| FsError::Device(e.to_string()))
    }

    /// Validates a requested file name: non-empty, no embedded NUL,
    /// short enough to fit with its NUL terminator.
    pub fn validate_name(name: &str) -> Result<()> {
        if name.is_empty() || name.len() >= MAX_FILENAME || name.as_bytes().contains(&0) {
            return Err(FsError::InvalidName);
        }
        Ok(())
    }

    /// Finds the slot index holding `name`, if any. Returns on the first
    /// match; names are unique by construction of [`Directory::create`].
    pub fn find_by_name(&self, name: &str) -> Option<usize> {
        let name = name.as_bytes();
        self.slots
            .iter()
            .position(|slot| matches!(slot, DirSlot::Used { name: n, .. } if Self::trim(n) == name))
    }

    /// The bytes of a stored name up to (not including) its first NUL.
    fn trim(name: &[u8; MAX_FILENAME]) -> &[u8] {
        let len = name.iter().position(|&b| b == 0).unwrap_or(MAX_FILENAME);
        &name[..len]
    }

    /// The slot at `index`, if it names a file.
    pub fn get(&self, index: usize) -> Option<&DirSlot> {
        match &self.slots[index] {
            DirSlot::Unused => None,
            used => Some(used),
        }
    }

    /// Creates a new, empty (`first_block: Free`, `size: 0`) entry named
    /// `name`. Fails with [`FsError::NameConflict`] if the name is
    /// already taken, or [`FsError::TableFull`] if no slot is free.
    pub fn create(&mut self, name: &str) -> Result<usize> {
        Self::validate_name(name)?;
        if self.find_by_name(name).is_some() {
            return Err(FsError::NameConflict);
        }
        let index = self
            .slots
            .iter()
            .position(|slot| matches!(slot, DirSlot::Unused))
            .ok_or(FsError::TableFull)?;
        let mut name_bytes = [0u8; MAX_FILENAME];
        name_bytes[..name.len()].copy_from_slice(name.as_bytes());
        self.slots[index] = DirSlot::Used { name: name_bytes, size: 0, first_block: FatEntry::Free };
        debug!("created directory entry {index} for {name:?}");
        Ok(index)
    }

    /// Clears the slot at `index`, regardless of its prior contents.
    pub fn remove(&mut self, index: usize) {
        self.slots[index] = DirSlot::Unused;
    }

    /// Updates the size and first-block pointer of the entry at `index`.
    pub fn set_meta(&mut self, index: usize, size: u32, first_block: FatEntry) {
        if let DirSlot::Used { size: s, first_block: f, .. } = &mut self.slots[index] {
            *s = size;
            *f = first_block;
        }
    }
}
