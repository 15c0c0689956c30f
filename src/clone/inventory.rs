//! The first pass of a tree clone: an ordered listing of every node in the
//! source tree along with the metadata that the copy must reproduce.

use super::CloneError;
use filetime::FileTime;
use std::{
    fs::{FileType, Metadata},
    os::unix::fs::{FileTypeExt, MetadataExt},
    path::{Path, PathBuf},
};
use walkdir::WalkDir;

/// The type of a filesystem node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
    CharDev,
    BlockDev,
    Fifo,
    Socket,
}

impl EntryKind {
    pub fn from_file_type(file_type: FileType) -> Option<EntryKind> {
        let kind = if file_type.is_symlink() {
            EntryKind::Symlink
        } else if file_type.is_dir() {
            EntryKind::Dir
        } else if file_type.is_file() {
            EntryKind::File
        } else if file_type.is_char_device() {
            EntryKind::CharDev
        } else if file_type.is_block_device() {
            EntryKind::BlockDev
        } else if file_type.is_fifo() {
            EntryKind::Fifo
        } else if file_type.is_socket() {
            EntryKind::Socket
        } else {
            return None;
        };

        Some(kind)
    }
}

/// A node of the source tree, with its path relative to the source root.
#[derive(Clone, Debug)]
pub struct InventoryEntry {
    pub path:        PathBuf,
    pub kind:        EntryKind,
    pub size:        u64,
    /// Permission bits, including the setuid, setgid and sticky bits.
    pub mode:        u32,
    pub uid:         u32,
    pub gid:         u32,
    pub atime:       FileTime,
    pub mtime:       FileTime,
    pub rdev:        Option<u64>,
    pub link_target: Option<PathBuf>,
}

impl InventoryEntry {
    /// Describe the node at `source`, which must be the `lstat` metadata of that path.
    pub fn new(
        source: &Path,
        relative: PathBuf,
        metadata: &Metadata,
    ) -> Result<Option<InventoryEntry>, CloneError> {
        let kind = match EntryKind::from_file_type(metadata.file_type()) {
            Some(kind) => kind,
            None => {
                warn!("skipping {:?}, which has an unknown file type", source);
                return Ok(None);
            }
        };

        let link_target = match kind {
            EntryKind::Symlink => Some(source.read_link().map_err(|why| CloneError::Io {
                action: "read link",
                path: source.to_path_buf(),
                why,
            })?),
            _ => None,
        };

        let rdev = match kind {
            EntryKind::CharDev | EntryKind::BlockDev => Some(metadata.rdev()),
            _ => None,
        };

        Ok(Some(InventoryEntry {
            path: relative,
            kind,
            size: metadata.len(),
            mode: metadata.mode() & 0o7777,
            uid: metadata.uid(),
            gid: metadata.gid(),
            atime: FileTime::from_last_access_time(metadata),
            mtime: FileTime::from_last_modification_time(metadata),
            rdev,
            link_target,
        }))
    }
}

/// Every node beneath a source root, parents before their children.
#[derive(Debug, Default)]
pub struct Inventory {
    pub entries:    Vec<InventoryEntry>,
    pub total_size: u64,
}

fn walk(root: &Path) -> WalkDir {
    WalkDir::new(root).follow_links(false).sort_by(|a, b| a.file_name().cmp(b.file_name()))
}

impl Inventory {
    /// Walk the tree at `root` twice: once to count its directories, and again
    /// to record each entry, reporting a value in `0..=10` as directories are
    /// visited.
    pub fn scan<F: FnMut(u32)>(root: &Path, mut progress: F) -> Result<Inventory, CloneError> {
        let scan_error = |why: walkdir::Error| CloneError::Scan { path: root.to_path_buf(), why };

        let mut directories = 0u64;
        for entry in walk(root) {
            if entry.map_err(scan_error)?.file_type().is_dir() {
                directories += 1;
            }
        }

        let mut inventory = Inventory::default();
        let mut visited = 0u64;
        let mut reported = 0;

        for entry in walk(root) {
            let entry = entry.map_err(scan_error)?;
            if entry.file_type().is_dir() {
                visited += 1;
                let value = (visited * 10 / directories.max(1)) as u32;
                if value != reported {
                    reported = value;
                    progress(value);
                }
            }

            if entry.depth() == 0 {
                continue;
            }

            let metadata = entry.metadata().map_err(scan_error)?;
            let relative = entry
                .path()
                .strip_prefix(root)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| entry.path().to_path_buf());

            if let Some(entry) = InventoryEntry::new(entry.path(), relative, &metadata)? {
                inventory.total_size += entry.size;
                inventory.entries.push(entry);
            }
        }

        info!(
            "scanned {} entries ({} bytes) beneath {}",
            inventory.entries.len(),
            inventory.total_size,
            root.display()
        );

        Ok(inventory)
    }
}
