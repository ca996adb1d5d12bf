//! The file system facade: owns the device, the FAT, the directory
//! table and the open-file table, and exposes the `make` / `mount` /
//! `unmount` / `create` / `delete` / `open` / `close` / `read` / `write`
//! / `seek` / `truncate` / `get_filesize` operations.
//!
//! There is no crate-level "is a volume mounted" flag: `mount` returns an
//! owned `FileSystem`, and `unmount` consumes it, so a caller cannot hold
//! two mounts of the same on-disk state at once — double-mounting is
//! unrepresentable rather than checked at runtime.

use crate::block::{Block, BlockDevice, BLOCK_SIZE};
use crate::directory::{DirSlot, Directory, META_BLOCKS};
use crate::fat::{Fat, FatEntry, DATA_BLOCKS};
use crate::handle::{Fd, HandleTable};
use crate::{FsError, Result};
use log::{debug, info, trace, warn};

/// Largest size, in bytes, a single file may grow to: every data block
/// on the disk, in one chain.
pub const MAX_FILE_SIZE: u32 = DATA_BLOCKS * BLOCK_SIZE as u32;

/// An owned mount of a `microfat` file system over a block device `D`.
pub struct FileSystem<D: BlockDevice> {
    device: D,
    fat: Fat,
    directory: Directory,
    handles: HandleTable,
}

impl<D: BlockDevice> FileSystem<D> {
    /// Formats a fresh disk named `name`: creates it at the fixed total
    /// size this crate always uses, then writes an all-free FAT and an
    /// empty directory table to it. Does not mount it.
    pub fn make(name: &str) -> Result<()> {
        let total_blocks = META_BLOCKS + DATA_BLOCKS;
        D::make_disk(name, total_blocks).map_err(|e| FsError::Device(e.to_string()))?;
        let mut device = D::open_disk(name).map_err(|e| FsError::Device(e.to_string()))?;
        Fat::new_free().save(&mut device)?;
        Directory::new_empty().save(&mut device)?;
        device.close_disk().map_err(|e| FsError::Device(e.to_string()))?;
        info!("formatted {name}");
        Ok(())
    }

    /// Opens `name` and loads its FAT and directory table into memory.
    pub fn mount(name: &str) -> Result<Self> {
        let mut device = D::open_disk(name).map_err(|e| FsError::Device(e.to_string()))?;
        let fat = Fat::load(&mut device)?;
        let directory = Directory::load(&mut device)?;
        info!("mounted {name}");
        Ok(FileSystem { device, fat, directory, handles: HandleTable::new() })
    }

    /// Flushes the FAT and directory table back to disk, closes the
    /// device and consumes `self`. Any descriptors still open are
    /// silently discarded; handles never survive past unmount.
    pub fn unmount(mut self) -> Result<()> {
        self.fat.save(&mut self.device)?;
        self.directory.save(&mut self.device)?;
        self.device.close_disk().map_err(|e| FsError::Device(e.to_string()))?;
        info!("unmounted");
        Ok(())
    }

    /// Creates a new, empty file named `name`.
    pub fn create(&mut self, name: &str) -> Result<()> {
        self.directory.create(name)?;
        Ok(())
    }

    /// Removes the file named `name`. Fails with [`FsError::Busy`] if
    /// any descriptor is still open on it.
    pub fn delete(&mut self, name: &str) -> Result<()> {
        let index = self.directory.find_by_name(name).ok_or(FsError::NotFound)?;
        if self.handles.any_open_for(index) {
            return Err(FsError::Busy);
        }
        if let Some(DirSlot::Used { first_block, .. }) = self.directory.get(index) {
            let first_block = *first_block;
            self.fat.free_chain(first_block);
        }
        self.directory.remove(index);
        debug!("deleted {name}");
        Ok(())
    }

    /// Opens `name`, returning a descriptor positioned at offset 0.
    pub fn open(&mut self, name: &str) -> Result<Fd> {
        let index = self.directory.find_by_name(name).ok_or(FsError::NotFound)?;
        self.handles.open(index).ok_or(FsError::TableFull)
    }

    /// Closes `fd`.
    pub fn close(&mut self, fd: Fd) -> Result<()> {
        self.handles.get(fd).ok_or(FsError::BadFd)?;
        self.handles.close(fd);
        Ok(())
    }

    /// The current size, in bytes, of the file `fd` refers to.
    pub fn get_filesize(&self, fd: Fd) -> Result<u32> {
        let (index, _) = self.handles.get(fd).ok_or(FsError::BadFd)?;
        self.size_of(index)
    }

    /// Moves `fd`'s cursor to `offset`. `offset` must not exceed the
    /// file's current size.
    pub fn seek(&mut self, fd: Fd, offset: u32) -> Result<()> {
        let (index, _) = self.handles.get(fd).ok_or(FsError::BadFd)?;
        let size = self.size_of(index)?;
        if offset > size {
            return Err(FsError::BadOffset);
        }
        self.handles.set_offset(fd, offset);
        Ok(())
    }

    /// Reads up to `buf.len()` bytes starting at `fd`'s cursor, advancing
    /// it by the number of bytes actually read. A read that starts at or
    /// past end-of-file returns `Ok(0)`, never an error.
    pub fn read(&mut self, fd: Fd, buf: &mut [u8]) -> Result<usize> {
        let (index, offset) = self.handles.get(fd).ok_or(FsError::BadFd)?;
        let (size, first_block) = self.used(index)?;
        if offset >= size {
            return Ok(0);
        }
        let to_read = (size - offset).min(buf.len() as u32) as usize;
        let chain = self.chain_blocks(first_block);
        let mut done = 0usize;
        let mut cursor = offset as usize;
        while done < to_read {
            let block_pos = cursor / BLOCK_SIZE;
            let in_block = cursor % BLOCK_SIZE;
            let phys = chain[block_pos] + META_BLOCKS;
            let mut block_buf: Block = [0u8; BLOCK_SIZE];
            self.device
                .block_read(phys, &mut block_buf)
                .map_err(|e| FsError::Device(e.to_string()))?;
            let n = (BLOCK_SIZE - in_block).min(to_read - done);
            buf[done..done + n].copy_from_slice(&block_buf[in_block..in_block + n]);
            done += n;
            cursor += n;
        }
        self.handles.set_offset(fd, offset + done as u32);
        trace!("read {done} bytes from fd {}", fd.0);
        Ok(done)
    }

    /// Writes up to `buf.len()` bytes starting at `fd`'s cursor, growing
    /// the file and allocating new blocks as needed, advancing the
    /// cursor by the number of bytes actually written. The amount
    /// written is capped so the file's size never exceeds
    /// [`MAX_FILE_SIZE`], and further capped to whatever the FAT has
    /// free blocks for; either cap yields a short (possibly zero-byte)
    /// write, never an error.
    pub fn write(&mut self, fd: Fd, buf: &[u8]) -> Result<usize> {
        let (index, offset) = self.handles.get(fd).ok_or(FsError::BadFd)?;
        let (mut size, mut first_block) = self.used(index)?;
        if offset > size {
            return Err(FsError::BadOffset);
        }
        let quota = MAX_FILE_SIZE.saturating_sub(size);
        let mut n = (buf.len() as u32).min(quota) as usize;
        if n < buf.len() {
            warn!("short write on fd {}: requested {}, writing {n}", fd.0, buf.len());
        }
        if n == 0 {
            return Ok(0);
        }
        let end = offset as usize + n;
        let needed_blocks = ((end + BLOCK_SIZE - 1) / BLOCK_SIZE) as u32;
        let (new_first_block, achieved_blocks) = self.ensure_chain_len(first_block, needed_blocks);
        first_block = new_first_block;
        if achieved_blocks < needed_blocks {
            let achievable_end = achieved_blocks as usize * BLOCK_SIZE;
            n = achievable_end.saturating_sub(offset as usize);
            warn!(
                "disk full: fd {} wanted {needed_blocks} blocks, got {achieved_blocks}; short write of {n} bytes",
                fd.0
            );
            if n == 0 {
                return Ok(0);
            }
        }
        let chain = self.chain_blocks(first_block);
        let mut done = 0usize;
        let mut cursor = offset as usize;
        while done < n {
            let block_pos = cursor / BLOCK_SIZE;
            let in_block = cursor % BLOCK_SIZE;
            let phys = chain[block_pos] + META_BLOCKS;
            let m = (BLOCK_SIZE - in_block).min(n - done);
            let mut block_buf: Block = [0u8; BLOCK_SIZE];
            if in_block != 0 || m < BLOCK_SIZE {
                self.device
                    .block_read(phys, &mut block_buf)
                    .map_err(|e| FsError::Device(e.to_string()))?;
            }
            block_buf[in_block..in_block + m].copy_from_slice(&buf[done..done + m]);
            self.device
                .block_write(phys, &block_buf)
                .map_err(|e| FsError::Device(e.to_string()))?;
            done += m;
            cursor += m;
        }
        size = size.max(offset + done as u32);
        self.directory.set_meta(index, size, first_block);
        self.handles.set_offset(fd, offset + done as u32);
        debug!("wrote {done} bytes to fd {}, new size {size}", fd.0);
        Ok(done)
    }

    /// Shrinks the file `fd` refers to so that it holds exactly
    /// `new_size` bytes, freeing any blocks past the new end. Every open
    /// descriptor on the same file has its cursor clamped to
    /// `new_size` if it now points past it. Growing a file via truncate
    /// is not supported: `new_size` greater than the current size fails
    /// with [`FsError::BadOffset`].
    pub fn truncate(&mut self, fd: Fd, new_size: u32) -> Result<()> {
        let (index, _) = self.handles.get(fd).ok_or(FsError::BadFd)?;
        let (size, first_block) = self.used(index)?;
        if new_size > size {
            return Err(FsError::BadOffset);
        }
        let keep_blocks = if new_size == 0 { 0 } else { ((new_size as usize - 1) / BLOCK_SIZE + 1) as u32 };
        let new_first = self.fat.truncate_chain(first_block, keep_blocks);
        self.directory.set_meta(index, new_size, new_first);
        self.handles.reclamp_all(index, new_size);
        debug!("truncated fd {} to {new_size} bytes", fd.0);
        Ok(())
    }

    fn used(&self, index: usize) -> Result<(u32, FatEntry)> {
        match self.directory.get(index) {
            Some(DirSlot::Used { size, first_block, .. }) => Ok((*size, *first_block)),
            _ => Err(FsError::NotFound),
        }
    }

    fn size_of(&self, index: usize) -> Result<u32> {
        self.used(index).map(|(size, _)| size)
    }

    /// Walks the chain starting at `first_block`, collecting data-block
    /// indices in order.
    fn chain_blocks(&self, first_block: FatEntry) -> Vec<u32> {
        let mut blocks = Vec::new();
        let mut cur = first_block;
        while let FatEntry::Next(i) = cur {
            blocks.push(i);
            cur = self.fat.get(i);
        }
        blocks
    }

    /// Extends the chain starting at `first_block` until it has at least
    /// `needed_blocks` blocks, allocating new ones from the FAT as
    /// needed. Stops as soon as the FAT runs out of free blocks rather
    /// than failing outright: the caller gets back however many blocks
    /// it actually managed, and turns the shortfall into a short write
    /// instead of an error. Returns the (possibly newly-allocated) first
    /// block together with the chain length actually achieved.
    fn ensure_chain_len(&mut self, first_block: FatEntry, needed_blocks: u32) -> (FatEntry, u32) {
        if needed_blocks == 0 {
            return (first_block, 0);
        }
        let mut chain = self.chain_blocks(first_block);
        let mut first_block = first_block;
        if chain.is_empty() {
            match self.fat.alloc_block() {
                Ok(b) => {
                    first_block = FatEntry::Next(b);
                    chain.push(b);
                }
                Err(_) => return (first_block, 0),
            }
        }
        while (chain.len() as u32) < needed_blocks {
            let b = match self.fat.alloc_block() {
                Ok(b) => b,
                Err(_) => break,
            };
            let tail = *chain.last().expect("chain non-empty after first allocation");
            self.fat.set(tail, FatEntry::Next(b));
            chain.push(b);
        }
        (first_block, chain.len() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemDisk;
    use crate::fat::DATA_BLOCKS;

    type Fs = FileSystem<MemDisk>;

    #[test]
    fn write_then_read_round_trips_bytes() {
        let name = "write_then_read_round_trips_bytes";
        Fs::make(name).unwrap();
        let mut fs = Fs::mount(name).unwrap();
        fs.create("a.txt").unwrap();
        let fd = fs.open("a.txt").unwrap();
        let written = fs.write(fd, b"hello world").unwrap();
        assert_eq!(written, 11);
        fs.seek(fd, 0).unwrap();
        let mut buf = [0u8; 11];
        let read = fs.read(fd, &mut buf).unwrap();
        assert_eq!(read, 11);
        assert_eq!(&buf, b"hello world");
        assert_eq!(fs.get_filesize(fd).unwrap(), 11);
        fs.unmount().unwrap();
    }

    #[test]
    fn write_spans_multiple_blocks() {
        let name = "write_spans_multiple_blocks";
        Fs::make(name).unwrap();
        let mut fs = Fs::mount(name).unwrap();
        fs.create("big.bin").unwrap();
        let fd = fs.open("big.bin").unwrap();
        let data = vec![0x5Au8; BLOCK_SIZE * 3 + 17];
        let written = fs.write(fd, &data).unwrap();
        assert_eq!(written, data.len());
        fs.seek(fd, 0).unwrap();
        let mut buf = vec![0u8; data.len()];
        let read = fs.read(fd, &mut buf).unwrap();
        assert_eq!(read, data.len());
        assert_eq!(buf, data);
        fs.unmount().unwrap();
    }

    #[test]
    fn read_past_end_of_file_returns_zero() {
        let name = "read_past_end_of_file_returns_zero";
        Fs::make(name).unwrap();
        let mut fs = Fs::mount(name).unwrap();
        fs.create("empty.txt").unwrap();
        let fd = fs.open("empty.txt").unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(fs.read(fd, &mut buf).unwrap(), 0);
        fs.unmount().unwrap();
    }

    #[test]
    fn seek_past_end_of_file_is_bad_offset() {
        let name = "seek_past_end_of_file_is_bad_offset";
        Fs::make(name).unwrap();
        let mut fs = Fs::mount(name).unwrap();
        fs.create("a.txt").unwrap();
        let fd = fs.open("a.txt").unwrap();
        fs.write(fd, b"abc").unwrap();
        assert_eq!(fs.seek(fd, 4).unwrap_err(), FsError::BadOffset);
        fs.seek(fd, 3).unwrap();
        fs.unmount().unwrap();
    }

    #[test]
    fn truncate_cannot_grow_a_file() {
        let name = "truncate_cannot_grow_a_file";
        Fs::make(name).unwrap();
        let mut fs = Fs::mount(name).unwrap();
        fs.create("a.txt").unwrap();
        let fd = fs.open("a.txt").unwrap();
        fs.write(fd, b"abc").unwrap();
        assert_eq!(fs.truncate(fd, 10).unwrap_err(), FsError::BadOffset);
        fs.unmount().unwrap();
    }

    #[test]
    fn truncate_reclamps_every_open_handle() {
        let name = "truncate_reclamps_every_open_handle";
        Fs::make(name).unwrap();
        let mut fs = Fs::mount(name).unwrap();
        fs.create("a.txt").unwrap();
        let fd1 = fs.open("a.txt").unwrap();
        fs.write(fd1, &vec![1u8; 100]).unwrap();
        let fd2 = fs.open("a.txt").unwrap();
        fs.seek(fd2, 80).unwrap();
        fs.truncate(fd1, 10).unwrap();
        assert_eq!(fs.get_filesize(fd2).unwrap(), 10);
        let mut buf = [0u8; 1];
        // fd2's cursor (80) should have been clamped to 10, so a read now
        // returns 0 bytes rather than panicking on an out-of-range offset.
        assert_eq!(fs.read(fd2, &mut buf).unwrap(), 0);
        fs.unmount().unwrap();
    }

    #[test]
    fn delete_refuses_a_file_with_an_open_handle() {
        let name = "delete_refuses_a_file_with_an_open_handle";
        Fs::make(name).unwrap();
        let mut fs = Fs::mount(name).unwrap();
        fs.create("a.txt").unwrap();
        let fd = fs.open("a.txt").unwrap();
        assert_eq!(fs.delete("a.txt").unwrap_err(), FsError::Busy);
        fs.close(fd).unwrap();
        fs.delete("a.txt").unwrap();
        fs.unmount().unwrap();
    }

    #[test]
    fn write_is_clamped_at_max_file_size() {
        let name = "write_is_clamped_at_max_file_size";
        Fs::make(name).unwrap();
        let mut fs = Fs::mount(name).unwrap();
        fs.create("a.txt").unwrap();
        let fd = fs.open("a.txt").unwrap();
        // Inflate the directory entry's recorded size to one byte under
        // quota so the write below only needs to land its last byte in
        // the file's final block, rather than writing MAX_FILE_SIZE
        // bytes through the public API to get there.
        fs.directory.set_meta(0, MAX_FILE_SIZE - 1, FatEntry::Free);
        fs.seek(fd, MAX_FILE_SIZE - 1).unwrap();
        let written = fs.write(fd, &[1, 2, 3]).unwrap();
        assert_eq!(written, 1);
        assert_eq!(fs.get_filesize(fd).unwrap(), MAX_FILE_SIZE);
        fs.unmount().unwrap();
    }

    #[test]
    fn write_is_short_once_the_disk_is_full_and_delete_frees_room_again() {
        let name = "write_is_short_once_the_disk_is_full_and_delete_frees_room_again";
        Fs::make(name).unwrap();
        let mut fs = Fs::mount(name).unwrap();
        fs.create("a.txt").unwrap();
        let fd = fs.open("a.txt").unwrap();

        // Exhaust every data block but one directly through the FAT, so
        // the write below has only one free block left to claim.
        for _ in 0..(DATA_BLOCKS - 1) {
            fs.fat.alloc_block().unwrap();
        }

        let data = vec![0x7Eu8; BLOCK_SIZE * 2];
        let written = fs.write(fd, &data).unwrap();
        assert_eq!(written, BLOCK_SIZE);
        assert_eq!(fs.get_filesize(fd).unwrap(), BLOCK_SIZE as u32);

        // The disk is now completely full: even a one-byte write is
        // short (zero bytes), not an error.
        assert_eq!(fs.write(fd, &[1]).unwrap(), 0);

        // Deleting the file frees its block, so a new file can use it.
        fs.close(fd).unwrap();
        fs.delete("a.txt").unwrap();
        fs.create("b.txt").unwrap();
        let fd = fs.open("b.txt").unwrap();
        assert_eq!(fs.write(fd, b"fits now").unwrap(), 8);
        fs.unmount().unwrap();
    }

    #[test]
    fn metadata_survives_unmount_and_remount() {
        let name = "metadata_survives_unmount_and_remount";
        Fs::make(name).unwrap();
        let mut fs = Fs::mount(name).unwrap();
        fs.create("a.txt").unwrap();
        let fd = fs.open("a.txt").unwrap();
        fs.write(fd, b"persisted").unwrap();
        fs.unmount().unwrap();

        let mut fs = Fs::mount(name).unwrap();
        let fd = fs.open("a.txt").unwrap();
        let mut buf = [0u8; 9];
        fs.read(fd, &mut buf).unwrap();
        assert_eq!(&buf, b"persisted");
        fs.unmount().unwrap();
    }

    #[test]
    fn open_handles_do_not_survive_unmount() {
        let name = "open_handles_do_not_survive_unmount";
        Fs::make(name).unwrap();
        let mut fs = Fs::mount(name).unwrap();
        fs.create("a.txt").unwrap();
        let _fd = fs.open("a.txt").unwrap();
        fs.unmount().unwrap();

        let mut fs = Fs::mount(name).unwrap();
        // A fresh mount's handle table starts empty, so even fd 0 (which
        // would have been valid pre-unmount) is unopened here.
        assert_eq!(fs.delete("a.txt"), Ok(()));
    }

    #[test]
    fn create_rejects_duplicate_and_delete_frees_the_name() {
        let name = "create_rejects_duplicate_and_delete_frees_the_name";
        Fs::make(name).unwrap();
        let mut fs = Fs::mount(name).unwrap();
        fs.create("a.txt").unwrap();
        assert_eq!(fs.create("a.txt").unwrap_err(), FsError::NameConflict);
        fs.delete("a.txt").unwrap();
        fs.create("a.txt").unwrap();
        fs.unmount().unwrap();
    }
}
