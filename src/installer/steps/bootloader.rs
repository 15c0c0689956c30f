use super::configure::run_helper;
use crate::installer::{HelperRunner, PhaseError};
use std::path::Path;
use ubiquity_chroot::BindMounts;

/// The first bootloader installer whose program exists on the live system.
pub fn select_bootloader(bootloaders: &[Vec<String>]) -> Option<&[String]> {
    bootloaders
        .iter()
        .find(|command| command.first().map_or(false, |program| Path::new(program).exists()))
        .map(Vec::as_slice)
}

/// Install the bootloader onto the target, with the host's `/proc` and
/// `/dev` bound into it for the duration.
pub fn configure_bootloader<R: HelperRunner + ?Sized>(
    runner: &mut R,
    target: &Path,
    bootloaders: &[Vec<String>],
) -> Result<(), PhaseError> {
    let mut binds = BindMounts::new(target, &["/proc", "/dev"])?;

    let result = match select_bootloader(bootloaders) {
        Some(helper) => {
            info!("installing the bootloader with {}", helper.join(" "));
            run_helper(runner, helper, &[])
        }
        None => Err(PhaseError::NoBootloader),
    };

    if let Err(why) = binds.unmount(true) {
        warn!("failed to release the bootloader mounts: {}", why);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempdir::TempDir;

    #[test]
    fn first_installed_bootloader_is_selected() {
        let dir = TempDir::new("bootloaders").unwrap();
        let grub = dir.path().join("grub-installer");
        let yaboot = dir.path().join("yaboot-installer");
        let bootloaders = vec![
            vec![grub.to_string_lossy().into_owned(), "/target".to_owned()],
            vec![yaboot.to_string_lossy().into_owned(), "/target".to_owned()],
        ];

        assert_eq!(select_bootloader(&bootloaders), None);

        fs::write(&yaboot, "").unwrap();
        assert_eq!(select_bootloader(&bootloaders), Some(bootloaders[1].as_slice()));

        fs::write(&grub, "").unwrap();
        assert_eq!(select_bootloader(&bootloaders), Some(bootloaders[0].as_slice()));
        assert_eq!(select_bootloader(&[]), None);
    }
}
