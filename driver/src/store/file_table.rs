/// Open-file table: maps names to their ordered remote block lists.
///
/// Entries are never removed before shutdown, so a handle is simply the
/// entry's slot in the table and stays valid as the table grows. Closing a
/// file clears its OPEN flag; reopening it resumes with the same blocks.
use bitflags::bitflags;

use crate::proto::{BlockId, NodeId, BLOCK_SIZE};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FileFlags: u32 {
        const OPEN = 1 << 0;
    }
}

/// Index of an entry in the file table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileHandle(pub usize);

/// Location of one block of file content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRef {
    pub node: NodeId,
    pub block: BlockId,
}

/// A single file table entry.
#[derive(Debug, Clone)]
pub struct FileEntry {
    name: String,
    /// Byte length of the file (the last block may be partly used).
    pub length: u64,
    /// Read/write cursor.
    pub position: u64,
    pub flags: FileFlags,
    /// Blocks composing the file, in file order.
    pub blocks: Vec<BlockRef>,
}

impl FileEntry {
    fn new(name: &str) -> Self {
        Self {
            name: String::from(name),
            length: 0,
            position: 0,
            flags: FileFlags::OPEN,
            blocks: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_open(&self) -> bool {
        self.flags.contains(FileFlags::OPEN)
    }

    pub fn set_open(&mut self, open: bool) {
        self.flags.set(FileFlags::OPEN, open);
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Bytes between the cursor and end of file.
    pub fn remaining(&self) -> u64 {
        self.length.saturating_sub(self.position)
    }

    /// Bytes of storage the block list provides.
    pub fn allocated_bytes(&self) -> u64 {
        self.blocks.len() as u64 * BLOCK_SIZE as u64
    }
}

#[derive(Default)]
pub struct FileTable {
    entries: Vec<FileEntry>,
}

impl FileTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open `name`, creating its entry on first use.
    ///
    /// Reopening a closed file resets its cursor to zero; opening an already
    /// open file returns its handle unchanged.
    pub fn open(&mut self, name: &str) -> FileHandle {
        if let Some((handle, entry)) = self.lookup_mut(name) {
            if !entry.is_open() {
                entry.set_open(true);
                entry.position = 0;
            }
            return handle;
        }

        self.entries.push(FileEntry::new(name));
        FileHandle(self.entries.len() - 1)
    }

    /// Look up a file by name.
    pub fn lookup(&self, name: &str) -> Option<(FileHandle, &FileEntry)> {
        self.entries
            .iter()
            .enumerate()
            .find(|(_, e)| e.name == name)
            .map(|(i, e)| (FileHandle(i), e))
    }

    /// Look up a file by name, returning a mutable reference.
    pub fn lookup_mut(&mut self, name: &str) -> Option<(FileHandle, &mut FileEntry)> {
        self.entries
            .iter_mut()
            .enumerate()
            .find(|(_, e)| e.name == name)
            .map(|(i, e)| (FileHandle(i), e))
    }

    pub fn get(&self, handle: FileHandle) -> Option<&FileEntry> {
        self.entries.get(handle.0)
    }

    pub fn get_mut(&mut self, handle: FileHandle) -> Option<&mut FileEntry> {
        self.entries.get_mut(handle.0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
