// src/dir.rs
use std::collections::{BTreeMap, HashMap};

use libc::{EEXIST, EINVAL, ENAMETOOLONG, ENOENT, ENOTDIR};
use thiserror::Error;

use crate::layout::{InodeName, ROOT_INO};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DirError {
    #[error("File or directory {0} does not exist")]
    NotFound(String),
    #[error("File or directory {0} already exists")]
    DuplicateName(String),
    #[error("{0} is a reserved name")]
    ReservedName(String),
    #[error("Directory {0} does not exist")]
    NotADirectory(String),
    #[error("Name {0} is longer than 5 bytes")]
    NameTooLong(String),
    #[error("Invalid name {0:?}")]
    InvalidName(String),
}

impl DirError {
    pub fn as_errno(&self) -> i32 {
        match self {
            DirError::NotFound(_) => ENOENT,
            DirError::DuplicateName(_) => EEXIST,
            DirError::ReservedName(_) => EINVAL,
            DirError::NotADirectory(_) => ENOTDIR,
            DirError::NameTooLong(_) => ENAMETOOLONG,
            DirError::InvalidName(_) => EINVAL,
        }
    }
}

/// Children of one directory, kept both by slot and by name.
#[derive(Debug, Clone)]
pub(crate) struct Directory {
    pub parent: u8,
    entries: BTreeMap<u8, InodeName>,
    index: HashMap<InodeName, u8>,
}

impl Directory {
    fn new(parent: u8) -> Self {
        Self {
            parent,
            entries: BTreeMap::new(),
            index: HashMap::new(),
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// In-memory directory hierarchy of the mounted volume, keyed by inode slot.
/// The root is the sentinel `ROOT_INO` and is its own parent.
#[derive(Debug, Clone)]
pub struct DirTree {
    directories: HashMap<u8, Directory>,
}

impl Default for DirTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DirTree {
    pub fn new() -> Self {
        let mut directories = HashMap::new();
        directories.insert(ROOT_INO, Directory::new(ROOT_INO));
        Self { directories }
    }

    pub fn is_directory(&self, ino: u8) -> bool {
        self.directories.contains_key(&ino)
    }

    pub fn parent_of(&self, dir: u8) -> Option<u8> {
        self.directories.get(&dir).map(|d| d.parent)
    }

    pub fn child_count(&self, dir: u8) -> usize {
        self.directories.get(&dir).map_or(0, Directory::len)
    }

    /// Children in ascending slot order.
    pub fn children(&self, dir: u8) -> impl Iterator<Item = (u8, InodeName)> + '_ {
        self.directories
            .get(&dir)
            .into_iter()
            .flat_map(|d| d.entries.iter().map(|(&ino, &name)| (ino, name)))
    }

    /// Stored child only; `.` and `..` never match.
    pub fn child(&self, parent: u8, name: &InodeName) -> Option<u8> {
        self.directories.get(&parent)?.index.get(name).copied()
    }

    /// Resolves one path component relative to `parent`.
    pub fn lookup(&self, parent: u8, name: &InodeName) -> Result<u8, DirError> {
        let dir = self
            .directories
            .get(&parent)
            .ok_or_else(|| DirError::NotADirectory(name.to_string()))?;
        match name.as_bytes() {
            b"." => Ok(parent),
            b".." => Ok(dir.parent),
            _ => dir
                .index
                .get(name)
                .copied()
                .ok_or_else(|| DirError::NotFound(name.to_string())),
        }
    }

    /// Links `ino` under `parent`. Directories get their own (empty) node.
    pub fn insert(
        &mut self,
        parent: u8,
        name: InodeName,
        ino: u8,
        is_dir: bool,
    ) -> Result<(), DirError> {
        if name.is_reserved() {
            return Err(DirError::ReservedName(name.to_string()));
        }
        let dir = self
            .directories
            .get_mut(&parent)
            .ok_or_else(|| DirError::NotADirectory(name.to_string()))?;
        if dir.index.contains_key(&name) {
            return Err(DirError::DuplicateName(name.to_string()));
        }
        dir.index.insert(name, ino);
        dir.entries.insert(ino, name);

        if is_dir {
            self.directories.entry(ino).or_insert_with(|| Directory::new(parent));
        }
        Ok(())
    }

    /// Slots of `name` and everything below it, children before their directory.
    pub fn subtree(&self, parent: u8, name: &InodeName) -> Result<Vec<u8>, DirError> {
        let ino = self
            .child(parent, name)
            .ok_or_else(|| DirError::NotFound(name.to_string()))?;

        let mut slots = Vec::new();
        self.collect_post_order(ino, &mut slots);
        Ok(slots)
    }

    /// Unlinks one slot from `parent`. A directory must already be empty.
    pub fn detach(&mut self, parent: u8, ino: u8) {
        if let Some(dir) = self.directories.get_mut(&parent) {
            if let Some(name) = dir.entries.remove(&ino) {
                dir.index.remove(&name);
            }
        }
        self.directories.remove(&ino);
    }

    fn collect_post_order(&self, ino: u8, out: &mut Vec<u8>) {
        if let Some(dir) = self.directories.get(&ino) {
            for &child in dir.entries.keys() {
                self.collect_post_order(child, out);
            }
        }
        out.push(ino);
    }
}
