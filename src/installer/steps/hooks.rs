use crate::{installer::PhaseError, progress::ProgressSink};
use std::{fs, io, os::unix::fs::PermissionsExt, path::Path};
use ubiquity_chroot::Command;

const TITLE: &str = "ubiquity/install/title";
const TARGET_HOOK: &str = "ubiquity/install/target_hook";

fn is_executable(path: &Path) -> bool {
    fs::metadata(path).map_or(false, |meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}

/// Names of the hooks in `dir`, skipping any with a `.` in their name, such
/// as backups left behind by package upgrades.
fn hook_names(dir: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        if let Ok(name) = entry?.file_name().into_string() {
            if !name.contains('.') {
                names.push(name);
            }
        }
    }

    names.sort();
    Ok(names)
}

/// Run each executable hook in `dir`, which repeat parts of the live
/// system's configuration on the target.
///
/// Hooks which fail are logged, and do not stop the installation.
pub fn run_target_hooks(dir: &Path, sink: &mut dyn ProgressSink) -> Result<(), PhaseError> {
    if !dir.is_dir() {
        info!("no target config hooks at {}", dir.display());
        return Ok(());
    }

    let hooks = hook_names(dir)?;
    sink.start(0, hooks.len() as u32, TITLE);

    for name in hooks {
        let hook = dir.join(&name);
        if is_executable(&hook) {
            sink.substitute(TARGET_HOOK, "SCRIPT", &name);
            sink.info(TARGET_HOOK);
            match Command::new(&hook).status() {
                Ok(ref status) if status.success() => info!("target config hook {} succeeded", name),
                Ok(status) => warn!("target config hook {} failed: {}", name, status),
                Err(why) => warn!("target config hook {} could not be run: {}", name, why),
            }
        }

        sink.step(1);
    }

    sink.stop();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{ProgressEvent, ProgressRecorder};
    use std::fs::Permissions;
    use tempdir::TempDir;

    fn script(path: &Path, body: &str, mode: u32) {
        fs::write(path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(path, Permissions::from_mode(mode)).unwrap();
    }

    #[test]
    fn hooks_run_in_order_and_failures_continue() {
        let dir = TempDir::new("hooks").unwrap();
        let marker = dir.path().join("ran");

        script(&dir.path().join("10-fails"), "exit 1", 0o755);
        script(&dir.path().join("20-backup.dpkg-old"), "exit 1", 0o755);
        script(&dir.path().join("30-disabled"), "exit 1", 0o644);
        script(&dir.path().join("40-marks"), &format!("touch {}", marker.display()), 0o755);

        let mut sink = ProgressRecorder::new();
        run_target_hooks(dir.path(), &mut sink).unwrap();

        assert!(marker.exists());
        assert_eq!(sink.events, vec![
            ProgressEvent::Start { min: 0, max: 3, title: TITLE.into() },
            ProgressEvent::Substitute {
                key:   TARGET_HOOK.into(),
                var:   "SCRIPT".into(),
                value: "10-fails".into(),
            },
            ProgressEvent::Info(TARGET_HOOK.into()),
            ProgressEvent::Step(1),
            ProgressEvent::Step(1),
            ProgressEvent::Substitute {
                key:   TARGET_HOOK.into(),
                var:   "SCRIPT".into(),
                value: "40-marks".into(),
            },
            ProgressEvent::Info(TARGET_HOOK.into()),
            ProgressEvent::Step(1),
            ProgressEvent::Stop,
        ]);
    }

    #[test]
    fn missing_directory_is_skipped() {
        let dir = TempDir::new("hooks").unwrap();
        let mut sink = ProgressRecorder::new();
        run_target_hooks(&dir.path().join("target-config"), &mut sink).unwrap();
        assert!(sink.events.is_empty());
    }
}
