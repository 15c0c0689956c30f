use crate::installer::PhaseError;
use proc_mounts::MountList;
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use sys_mount::*;
use ubiquity_chroot::Command;

/// Loop device which compressed loop images are attached to.
const CLOOP_DEVICE: &str = "/dev/cloop1";

/// The live file system, mounted where it can be copied from.
pub struct SourceMount {
    mount: Mount,
    cloop: Option<PathBuf>,
}

/// The first of the candidate images which exists.
pub fn choose_image(candidates: &[PathBuf]) -> Option<&Path> {
    candidates.iter().map(PathBuf::as_path).find(|image| image.is_file())
}

fn is_cloop(image: &Path) -> bool { image.extension().map_or(false, |ext| ext == "cloop") }

/// Where a squashfs file system is already mounted, if anywhere.
fn live_squashfs() -> io::Result<Option<PathBuf>> {
    let mounts = MountList::new()?;
    Ok(mounts.0.into_iter().find(|mount| mount.fstype == "squashfs").map(|mount| mount.dest))
}

impl SourceMount {
    /// Mount the live file system at `source`.
    ///
    /// A squashfs which the live system already mounted is bound in place;
    /// otherwise the first of `images` that exists is mounted read-only.
    pub fn mount(source: &Path, images: &[PathBuf]) -> Result<SourceMount, PhaseError> {
        if !source.is_dir() {
            fs::create_dir_all(source)?;
        }

        if let Some(live) = live_squashfs()? {
            info!("binding the live file system at {} to {}", live.display(), source.display());
            let mount = Mount::new(&live, source, "none", MountFlags::BIND, None)?;
            return Ok(SourceMount { mount, cloop: None });
        }

        let image = choose_image(images).ok_or(PhaseError::NoSourceImage)?;
        let supported = SupportedFilesystems::new()?;
        info!("mounting {} at {}", image.display(), source.display());

        if is_cloop(image) {
            Command::new("losetup").arg(CLOOP_DEVICE).arg(image).run()?;
            let mount = Mount::new(CLOOP_DEVICE, source, &supported, MountFlags::RDONLY, None)
                .map_err(|why| {
                    let _ = Command::new("losetup").args(&["-d", CLOOP_DEVICE]).run();
                    why
                })?;

            return Ok(SourceMount { mount, cloop: Some(PathBuf::from(CLOOP_DEVICE)) });
        }

        let mount = Mount::new(image, source, &supported, MountFlags::RDONLY, None)?;
        Ok(SourceMount { mount, cloop: None })
    }

    /// Unmount the source, and detach the loop device it was attached to.
    pub fn unmount(self) -> io::Result<()> {
        self.mount.unmount(UnmountFlags::empty())?;
        if let Some(device) = self.cloop {
            Command::new("losetup").arg("-d").arg(&device).run()?;
        }

        Ok(())
    }
}
