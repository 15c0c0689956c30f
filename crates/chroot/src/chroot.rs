use crate::command::Command;
use std::{
    ffi::OsStr,
    io::Result,
    path::{Path, PathBuf},
};
use sys_mount::*;

/// A set of binding mounts of host paths into a target root, which are
/// released in reverse order when unmounted or dropped.
pub struct BindMounts {
    mounts: Vec<Mount>,
}

impl BindMounts {
    /// Bind each host path onto the same location beneath `root`.
    pub fn new<P: AsRef<Path>>(root: P, sources: &[&str]) -> Result<Self> {
        let root = root.as_ref();
        let mut mounts = Vec::with_capacity(sources.len());
        for source in sources {
            let target = root.join(source.trim_start_matches('/'));
            debug!("binding {} to {}", source, target.display());
            // Mounts pushed so far are released by `Drop` if this fails.
            mounts.push(Mount::new(*source, &target, "none", MountFlags::BIND, None)?);
        }

        Ok(BindMounts { mounts })
    }

    /// Return an error if any of the mounts fail to unmount.
    pub fn unmount(&mut self, lazy: bool) -> Result<()> {
        let flags = if lazy { UnmountFlags::DETACH } else { UnmountFlags::empty() };
        while let Some(mount) = self.mounts.pop() {
            mount.unmount(flags)?;
        }
        Ok(())
    }
}

impl Drop for BindMounts {
    fn drop(&mut self) {
        while let Some(mount) = self.mounts.pop() {
            let _ = mount.unmount(UnmountFlags::DETACH);
        }
    }
}

/// Executes commands within a root directory, which has the given host
/// paths bound into it for the lifetime of this value.
pub struct Chroot {
    pub path: PathBuf,
    binds:    BindMounts,
}

impl Chroot {
    pub fn new<P: AsRef<Path>>(path: P, binds: &[&str]) -> Result<Self> {
        let path = path.as_ref().canonicalize()?;
        info!("preparing chroot at {} with {:?}", path.display(), binds);
        let binds = BindMounts::new(&path, binds)?;
        Ok(Chroot { path, binds })
    }

    /// Executes an external command with `chroot`.
    pub fn command<S: AsRef<OsStr>, T: AsRef<OsStr>, I: IntoIterator<Item = T>>(
        &self,
        cmd: S,
        args: I,
    ) -> Command {
        cascade! {
            Command::new("chroot");
            ..arg(&self.path);
            ..arg(cmd.as_ref());
            ..args(args);
        }
    }

    pub fn unmount(&mut self, lazy: bool) -> Result<()> { self.binds.unmount(lazy) }
}
