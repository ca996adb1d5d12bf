//! The file allocation table: a singly-linked free/used list over the
//! data region, one entry per data block.
//!
//! Each slot holds either a sentinel (free, end-of-chain) or the index
//! of the next block in the chain. [`FatEntry`] makes that a tagged enum
//! rather than a raw `i32`, so the in-memory API can never mistake a
//! sentinel for an index; `to_raw`/`from_raw` still encode it on disk as
//! the original `-2`/`-1`/non-negative scheme.

use crate::block::{Block, BlockDevice, BLOCK_SIZE};
use crate::{FsError, Result};
use byteorder::{ByteOrder, LittleEndian};
use log::{debug, trace};

/// Number of data blocks this file system manages. Fixed at compile
/// time; there is no runtime configuration for disk geometry.
pub const DATA_BLOCKS: u32 = 4096;

/// Number of metadata blocks the FAT itself occupies. Four bytes per
/// entry, `DATA_BLOCKS` entries, rounded up to whole blocks: the FAT does
/// not fit in a single block, so (per the chosen resolution of the
/// on-disk layout) it is spread across this many.
pub const FAT_BLOCKS: u32 = {
    let bytes = DATA_BLOCKS as usize * 4;
    ((bytes + BLOCK_SIZE - 1) / BLOCK_SIZE) as u32
};

const ENTRIES_PER_BLOCK: usize = BLOCK_SIZE / 4;

/// One slot of the file allocation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatEntry {
    /// The block is not part of any file's chain.
    Free,
    /// The block is the last block of its chain.
    End,
    /// The block is followed by the given data-block index.
    Next(u32),
}

impl FatEntry {
    fn to_raw(self) -> i32 {
        match self {
            FatEntry::Free => -2,
            FatEntry::End => -1,
            FatEntry::Next(i) => i as i32,
        }
    }

    fn from_raw(raw: i32) -> Self {
        match raw {
            -2 => FatEntry::Free,
            -1 => FatEntry::End,
            n if n >= 0 => FatEntry::Next(n as u32),
            _ => FatEntry::Free,
        }
    }
}

/// The in-memory file allocation table, loaded in full at mount time and
/// flushed in full at unmount: metadata is write-back, not write-through.
pub struct Fat {
    entries: Vec<FatEntry>,
}

impl Fat {
    /// An all-free table, used by `FileSystem::make` when formatting a
    /// fresh disk.
    pub fn new_free() -> Self {
        Fat { entries: vec![FatEntry::Free; DATA_BLOCKS as usize] }
    }

    /// Reads the FAT's `FAT_BLOCKS` blocks off `device` starting at
    /// physical block 0.
    pub fn load<D: BlockDevice>(device: &mut D) -> Result<Self> {
        let mut entries = Vec::with_capacity(DATA_BLOCKS as usize);
        let mut block: Block = [0u8; BLOCK_SIZE];
        for fat_block in 0..FAT_BLOCKS {
            device
                .block_read(fat_block, &mut block)
                .map_err(|e| FsError::Device(e.to_string()))?;
            for i in 0..ENTRIES_PER_BLOCK {
                if entries.len() == DATA_BLOCKS as usize {
                    break;
                }
                let raw = LittleEndian::read_i32(&block[i * 4..i * 4 + 4]);
                entries.push(FatEntry::from_raw(raw));
            }
        }
        trace!("loaded fat: {} entries across {} blocks", entries.len(), FAT_BLOCKS);
        Ok(Fat { entries })
    }

    /// Writes the FAT back to physical blocks `0..FAT_BLOCKS`.
    pub fn save<D: BlockDevice>(&self, device: &mut D) -> Result<()> {
        for fat_block in 0..FAT_BLOCKS {
            let mut block: Block = [0u8; BLOCK_SIZE];
            for i in 0..ENTRIES_PER_BLOCK {
                let idx = fat_block as usize * ENTRIES_PER_BLOCK + i;
                if idx >= self.entries.len() {
                    break;
                }
                LittleEndian::write_i32(&mut block[i * 4..i * 4 + 4], self.entries[idx].to_raw());
            }
            device
                .block_write(fat_block, &block)
                .map_err(|e| FsError::Device(e.to_string()))?;
        }
        trace!("saved fat across {} blocks", FAT_BLOCKS);
        Ok(())
    }

    /// The entry at data-block index `i`.
    pub fn get(&self, i: u32) -> FatEntry {
        self.entries[i as usize]
    }

    /// Sets the entry at data-block index `i`.
    pub fn set(&mut self, i: u32, entry: FatEntry) {
        self.entries[i as usize] = entry;
    }

    /// Finds and reserves one free block, marking it `End`. Used both to
    /// start a new chain and to extend one.
    pub fn alloc_block(&mut self) -> Result<u32> {
        for i in 0..self.entries.len() {
            if self.entries[i] == FatEntry::Free {
                self.entries[i] = FatEntry::End;
                debug!("allocated data block {i}");
                return Ok(i as u32);
            }
        }
        Err(FsError::TableFull)
    }

    /// Walks the chain starting at `first`, freeing every block in it.
    /// `first` itself is not a block index; the chain's own entries are
    /// freed as the walk passes through them.
    pub fn free_chain(&mut self, first: FatEntry) {
        let mut cur = first;
        while let FatEntry::Next(i) = cur {
            let next = self.entries[i as usize];
            self.entries[i as usize] = FatEntry::Free;
            cur = next;
        }
    }

    /// Truncates the chain starting at `first` so that it holds exactly
    /// `keep_blocks` blocks, freeing the remainder. Returns the `FatEntry`
    /// that should become the directory entry's new `first_block` (either
    /// unchanged, or `Free`/`End` if the file shrank to zero/one block).
    pub fn truncate_chain(&mut self, first: FatEntry, keep_blocks: u32) -> FatEntry {
        if keep_blocks == 0 {
            self.free_chain(first);
            return FatEntry::Free;
        }
        let mut cur = first;
        for _ in 1..keep_blocks {
            match cur {
                FatEntry::Next(i) => cur = self.entries[i as usize],
                FatEntry::End => return first,
                FatEntry::Free => return FatEntry::Free,
            }
        }
        if let FatEntry::Next(i) = cur {
            self.free_chain(self.entries[i as usize]);
            self.entries[i as usize] = FatEntry::End;
        }
        first
    }
}
