//! The open-file table: a fixed-capacity array mapping file descriptors
//! to `(directory entry, cursor offset)` pairs.
//!
//! A closed slot is its own [`Handle::Unused`] variant instead of a
//! `used: bool` flag alongside a stale index.

/// Maximum number of file descriptors that can be open at once.
pub const MAX_FD: usize = 32;

/// One slot of the open-file table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handle {
    /// The slot is not in use.
    Unused,
    /// The slot is an open file descriptor.
    Used {
        /// Index into the directory table of the file this descriptor
        /// refers to.
        dir_index: usize,
        /// The descriptor's read/write cursor, in bytes from the start
        /// of the file.
        offset: u32,
    },
}

/// A file descriptor: an opaque handle into a [`HandleTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fd(pub(crate) usize);

/// The in-memory open-file table. Never persisted: open handles are
/// purely in-memory state and do not survive unmount.
pub struct HandleTable {
    slots: [Handle; MAX_FD],
}

impl HandleTable {
    /// A table with no open descriptors.
    pub fn new() -> Self {
        HandleTable { slots: [Handle::Unused; MAX_FD] }
    }

    /// Opens a new descriptor for `dir_index` at offset 0. Returns
    /// `None` if every slot is in use.
    pub fn open(&mut self, dir_index: usize) -> Option<Fd> {
        let slot = self.slots.iter().position(|h| matches!(h, Handle::Unused))?;
        self.slots[slot] = Handle::Used { dir_index, offset: 0 };
        Some(Fd(slot))
    }

    /// Closes `fd`. A no-op if it was already closed.
    pub fn close(&mut self, fd: Fd) {
        if let Some(slot) = self.slots.get_mut(fd.0) {
            *slot = Handle::Unused;
        }
    }

    /// The `(dir_index, offset)` pair `fd` refers to, if it is open.
    pub fn get(&self, fd: Fd) -> Option<(usize, u32)> {
        match self.slots.get(fd.0)? {
            Handle::Used { dir_index, offset } => Some((*dir_index, *offset)),
            Handle::Unused => None,
        }
    }

    /// Sets the cursor offset of `fd`. A no-op if it is closed.
    pub fn set_offset(&mut self, fd: Fd, offset: u32) {
        if let Some(Handle::Used { offset: o, .. }) = self.slots.get_mut(fd.0) {
            *o = offset;
        }
    }

    /// True if any open descriptor refers to `dir_index`. Used by
    /// `delete` to reject removing a file that is still open.
    pub fn any_open_for(&self, dir_index: usize) -> bool {
        self.slots.iter().any(|h| matches!(h, Handle::Used { dir_index: d, .. } if *d == dir_index))
    }

    /// Clamps the offset of every descriptor open on `dir_index` to at
    /// most `new_size`. Called by `truncate` so that a shrunk file never
    /// leaves a stale cursor past its new end.
    pub fn reclamp_all(&mut self, dir_index: usize, new_size: u32) {
        for h in self.slots.iter_mut() {
            if let Handle::Used { dir_index: d, offset } = h {
                if *d == dir_index && *offset > new_size {
                    *offset = new_size;
                }
            }
        }
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_assigns_distinct_fds() {
        let mut table = HandleTable::new();
        let a = table.open(0).unwrap();
        let b = table.open(1).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn close_frees_the_slot_for_reuse() {
        let mut table = HandleTable::new();
        let fd = table.open(0).unwrap();
        table.close(fd);
        assert!(table.get(fd).is_none());
    }

    #[test]
    fn table_full_once_max_fd_reached() {
        let mut table = HandleTable::new();
        for i in 0..MAX_FD {
            table.open(i).unwrap();
        }
        assert!(table.open(MAX_FD).is_none());
    }

    #[test]
    fn reclamp_all_caps_every_handle_on_the_same_file() {
        let mut table = HandleTable::new();
        let a = table.open(3).unwrap();
        let b = table.open(3).unwrap();
        table.set_offset(a, 100);
        table.set_offset(b, 50);
        table.reclamp_all(3, 60);
        assert_eq!(table.get(a).unwrap().1, 60);
        assert_eq!(table.get(b).unwrap().1, 50);
    }

    #[test]
    fn any_open_for_reports_open_descriptors() {
        let mut table = HandleTable::new();
        assert!(!table.any_open_for(4));
        let fd = table.open(4).unwrap();
        assert!(table.any_open_for(4));
        table.close(fd);
        assert!(!table.any_open_for(4));
    }
}
