use super::packages::IGNORE_TIME_CONFLICT;
use crate::{errors::IoContext, installer::PhaseError};
use std::{
    fs::{self, Permissions},
    io,
    os::unix::fs::PermissionsExt,
    path::Path,
};
use ubiquity_chroot::Command;

/// Copy the installer's log into the target, readable only by root.
///
/// A failed copy is logged, and the installation carries on.
pub fn copy_logs(syslog: &Path, target: &Path) -> Result<(), PhaseError> {
    let dest = target.join(syslog.strip_prefix("/").unwrap_or(syslog));
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|why| format!("failed to create {}: {}", parent.display(), why))?;
    }

    if let Err(why) = Command::new("cp").arg("-a").arg(syslog).arg(&dest).run() {
        error!("failed to copy the installation logs: {}", why);
    }

    fs::set_permissions(&dest, Permissions::from_mode(0o600))
        .with_context(|why| format!("failed to restrict {}: {}", dest.display(), why))?;
    Ok(())
}

/// Remove configuration which was only needed while installing.
pub fn cleanup(target: &Path) -> Result<(), PhaseError> {
    let path = target.join(IGNORE_TIME_CONFLICT);
    match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(ref why) if why.kind() == io::ErrorKind::NotFound => {
            debug!("{} was already removed", path.display());
            Ok(())
        }
        Err(why) => Err(why.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn logs_are_private_to_root() {
        let dir = TempDir::new("logs").unwrap();
        let syslog = dir.path().join("syslog");
        let target = dir.path().join("target");
        fs::write(&syslog, "installation started\n").unwrap();
        fs::set_permissions(&syslog, Permissions::from_mode(0o644)).unwrap();

        copy_logs(&syslog, &target).unwrap();

        let copied = target.join(syslog.strip_prefix("/").unwrap());
        assert_eq!(fs::read_to_string(&copied).unwrap(), "installation started\n");
        assert_eq!(fs::metadata(&copied).unwrap().permissions().mode() & 0o777, 0o600);
    }

    #[test]
    fn cleanup_tolerates_missing_overrides() {
        let dir = TempDir::new("target").unwrap();
        cleanup(dir.path()).unwrap();

        super::super::packages::write_apt_overrides(dir.path()).unwrap();
        cleanup(dir.path()).unwrap();
        assert!(!dir.path().join(IGNORE_TIME_CONFLICT).exists());
    }
}
