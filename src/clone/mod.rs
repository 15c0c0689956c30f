//! Reproduces a live filesystem tree onto the target, preserving the type,
//! content, ownership, permissions and timestamps of every node.
//!
//! Each node is only created if it is not already present on the target, so a
//! clone which was interrupted may be resumed by running it again.

mod inventory;
mod throughput;

pub use self::{inventory::*, throughput::*};

use crate::progress::{format_time, ProgressSink};
use filetime::FileTime;
use std::{
    ffi::CString,
    fs::{self, DirBuilder, Permissions},
    io,
    os::unix::{
        ffi::OsStrExt,
        fs::{lchown, symlink, DirBuilderExt, PermissionsExt},
    },
    path::{Path, PathBuf},
};

pub const TITLE: &str = "ubiquity/install/title";
pub const SCANNING: &str = "ubiquity/install/scanning";
pub const COPYING: &str = "ubiquity/install/copying";
pub const COPYING_TIME: &str = "ubiquity/install/copying_time";

/// Share of the bar reserved for scanning, the remainder being the copy.
const SCAN_SHARE: u32 = 10;

#[derive(Debug, Fail)]
pub enum CloneError {
    #[fail(display = "failed to scan {:?}: {}", path, why)]
    Scan { path: PathBuf, why: walkdir::Error },
    #[fail(display = "failed to {} {:?}: {}", action, path, why)]
    Io { action: &'static str, path: PathBuf, why: io::Error },
}

fn io_error(action: &'static str, path: &Path) -> impl FnOnce(io::Error) -> CloneError {
    let path = path.to_path_buf();
    move |why| CloneError::Io { action, path, why }
}

/// Sets the process umask for as long as it is alive.
struct UmaskGuard(libc::mode_t);

impl UmaskGuard {
    fn new(mask: libc::mode_t) -> Self { UmaskGuard(unsafe { libc::umask(mask) }) }
}

impl Drop for UmaskGuard {
    fn drop(&mut self) {
        unsafe {
            libc::umask(self.0);
        }
    }
}

/// Whether anything exists at the path, without following symlinks.
fn exists(path: &Path) -> bool { fs::symlink_metadata(path).is_ok() }

fn mknod(path: &Path, kind: libc::mode_t, mode: u32, rdev: u64) -> io::Result<()> {
    let cpath = CString::new(path.as_os_str().as_bytes())
        .map_err(|why| io::Error::new(io::ErrorKind::InvalidInput, why))?;
    let result =
        unsafe { libc::mknod(cpath.as_ptr(), kind | mode as libc::mode_t, rdev as libc::dev_t) };
    if result == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// The `mknod` file type and device number of a special file, or `None` for
/// the kinds which are not created with `mknod`.
fn special_node(kind: EntryKind, rdev: Option<u64>) -> Option<(libc::mode_t, u64)> {
    match kind {
        EntryKind::CharDev => Some((libc::S_IFCHR, rdev.unwrap_or(0))),
        EntryKind::BlockDev => Some((libc::S_IFBLK, rdev.unwrap_or(0))),
        EntryKind::Fifo => Some((libc::S_IFIFO, 0)),
        EntryKind::Socket => Some((libc::S_IFSOCK, 0)),
        EntryKind::Dir | EntryKind::Symlink | EntryKind::File => None,
    }
}

/// Set the times of `path` without opening it, which would block on a fifo
/// and fail on a socket.
fn set_times(path: &Path, atime: FileTime, mtime: FileTime) -> io::Result<()> {
    filetime::set_symlink_file_times(path, atime, mtime)
}

/// Create the node described by `entry` at `target`, unless it already exists.
fn create_node(entry: &InventoryEntry, source: &Path, target: &Path) -> Result<(), CloneError> {
    if entry.kind != EntryKind::Dir {
        if let Some(parent) = target.parent().filter(|parent| !parent.is_dir()) {
            fs::create_dir_all(parent).map_err(io_error("create parent of", target))?;
        }
    }

    match entry.kind {
        EntryKind::Dir => {
            if !target.is_dir() {
                DirBuilder::new()
                    .mode(entry.mode)
                    .create(target)
                    .map_err(io_error("create directory", target))?;
            }
        }
        EntryKind::Symlink => {
            if !exists(target) {
                let link = entry.link_target.as_ref().map_or(Path::new(""), PathBuf::as_path);
                symlink(link, target).map_err(io_error("create symlink", target))?;
            }
        }
        EntryKind::File => {
            if !exists(target) {
                fs::copy(source, target).map_err(io_error("copy file to", target))?;
            }
        }
        kind => {
            if !exists(target) {
                if let Some((kind, rdev)) = special_node(kind, entry.rdev) {
                    mknod(target, kind, entry.mode, rdev)
                        .map_err(io_error("create node", target))?;
                }
            }
        }
    }

    Ok(())
}

/// Apply the ownership, permissions and (for everything but directories and
/// symlinks) the timestamps of `entry` to `target`.
fn apply_metadata(entry: &InventoryEntry, target: &Path) -> Result<(), CloneError> {
    lchown(target, Some(entry.uid), Some(entry.gid)).map_err(io_error("change owner of", target))?;

    match entry.kind {
        EntryKind::Symlink => (),
        EntryKind::Dir => {
            fs::set_permissions(target, Permissions::from_mode(entry.mode))
                .map_err(io_error("set permissions of", target))?;
        }
        _ => {
            fs::set_permissions(target, Permissions::from_mode(entry.mode))
                .map_err(io_error("set permissions of", target))?;
            set_times(target, entry.atime, entry.mtime)
                .map_err(io_error("set timestamps of", target))?;
        }
    }

    Ok(())
}

/// Copies a source tree onto a target, reporting progress and the estimated
/// time remaining.
pub struct FileTreeCloner<C: Clock = MonotonicClock> {
    clock: C,
}

impl FileTreeCloner<MonotonicClock> {
    pub fn new() -> Self { FileTreeCloner { clock: MonotonicClock::default() } }
}

impl Default for FileTreeCloner<MonotonicClock> {
    fn default() -> Self { Self::new() }
}

impl<C: Clock> FileTreeCloner<C> {
    pub fn with_clock(clock: C) -> Self { FileTreeCloner { clock } }

    /// Clone every node beneath `source` into the existing directory `target`.
    ///
    /// The progress bar is stopped whether or not the clone succeeds.
    pub fn clone_tree(
        &self,
        source: &Path,
        target: &Path,
        sink: &mut dyn ProgressSink,
    ) -> Result<(), CloneError> {
        sink.start(0, 100, TITLE);
        let result = self.copy_tree(source, target, sink);
        if result.is_ok() {
            sink.set(100);
        }

        sink.stop();
        result
    }

    fn copy_tree(
        &self,
        source: &Path,
        target: &Path,
        sink: &mut dyn ProgressSink,
    ) -> Result<(), CloneError> {
        sink.info(SCANNING);
        let inventory = Inventory::scan(source, |value| sink.set(value))?;

        sink.set(SCAN_SHARE);
        sink.info(COPYING);
        info!("copying {} to {}", source.display(), target.display());

        let _umask = UmaskGuard::new(0);
        let total = inventory.total_size;
        let share = 100 - SCAN_SHARE;
        let mut throughput = Throughput::new(self.clock.now());
        let mut directory_times: Vec<(PathBuf, FileTime, FileTime)> = Vec::new();
        let mut copied = 0u64;
        let mut copy_progress = 0;

        for entry in &inventory.entries {
            let source_path = source.join(&entry.path);
            let target_path = target.join(&entry.path);

            create_node(entry, &source_path, &target_path)?;
            apply_metadata(entry, &target_path)?;

            copied += entry.size;
            if entry.kind == EntryKind::Dir {
                directory_times.push((target_path, entry.atime, entry.mtime));
            }

            let progress = if total == 0 {
                share
            } else {
                (u128::from(copied) * u128::from(share) / u128::from(total)) as u32
            };

            if progress != copy_progress {
                copy_progress = progress;
                sink.set(SCAN_SHARE + progress);
            }

            if let Some(remaining) = throughput.record(self.clock.now(), copied, total) {
                sink.substitute(COPYING_TIME, "TIME", &format_time(remaining));
                sink.info(COPYING_TIME);
            }
        }

        // Writing into a directory bumps its timestamps, so they are applied last.
        for (directory, atime, mtime) in directory_times {
            set_times(&directory, atime, mtime)
                .map_err(io_error("set timestamps of", &directory))?;
        }

        info!("copied {} bytes to {}", copied, target.display());
        Ok(())
    }
}
