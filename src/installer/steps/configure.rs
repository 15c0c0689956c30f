use crate::installer::{ConfigSource, HelperRunner, PhaseError};
use std::path::Path;
use ubiquity_chroot::Chroot;

/// Run an external helper, naming it in the error if it fails.
pub fn run_helper<R: HelperRunner + ?Sized>(
    runner: &mut R,
    command: &[String],
    envs: &[(&str, &str)],
) -> Result<(), PhaseError> {
    runner
        .run(command, envs)
        .map_err(|why| PhaseError::Helper { helper: command.join(" "), why })
}

/// Run each timezone helper in turn, stopping at the first failure.
pub fn configure_timezone<R: HelperRunner + ?Sized>(
    runner: &mut R,
    helpers: &[Vec<String>],
) -> Result<(), PhaseError> {
    for helper in helpers {
        run_helper(runner, helper, &[])?;
    }

    Ok(())
}

/// Apply the chosen keymap, which is handed to the helper through `KEYMAP`.
pub fn configure_keyboard<R: HelperRunner + ?Sized, A: ConfigSource>(
    runner: &mut R,
    helper: &[String],
    answers: &A,
) -> Result<(), PhaseError> {
    match answers.get("debian-installer/keymap") {
        Some(keymap) => {
            info!("applying keymap {}", keymap);
            run_helper(runner, helper, &[("KEYMAP", keymap.as_str())])
        }
        None => run_helper(runner, helper, &[]),
    }
}

/// Packages whose configuration depends on the hardware of the target.
pub fn hardware_packages(kernel_version: &str) -> [String; 2] {
    [
        format!("linux-image-{}", kernel_version),
        format!("linux-restricted-modules-{}", kernel_version),
    ]
}

/// Reconfigure the packages which depend on the installed hardware.
///
/// Nothing here is fatal: failures are logged and the phase succeeds.
pub fn configure_hardware(target: &Path, kernel_version: &str) -> Result<(), PhaseError> {
    let mut chroot = match Chroot::new(target, &["/proc", "/sys"]) {
        Ok(chroot) => chroot,
        Err(why) => {
            error!("failed to prepare {} for hardware configuration: {}", target.display(), why);
            return Ok(());
        }
    };

    for package in &hardware_packages(kernel_version) {
        let result = chroot
            .command("dpkg-reconfigure", &["-fnoninteractive", package.as_str()])
            .run();

        if let Err(why) = result {
            error!("failed to reconfigure {}: {}", package, why);
        }
    }

    if let Err(why) = chroot.unmount(false) {
        error!("failed to release the hardware configuration chroot: {}", why);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::BTreeMap, io};

    #[derive(Default)]
    struct Recorder {
        runs: Vec<(Vec<String>, Vec<(String, String)>)>,
        fail: bool,
    }

    impl HelperRunner for Recorder {
        fn run(&mut self, command: &[String], envs: &[(&str, &str)]) -> io::Result<()> {
            let envs = envs.iter().map(|&(k, v)| (k.to_owned(), v.to_owned())).collect();
            self.runs.push((command.to_vec(), envs));
            if self.fail {
                Err(io::Error::new(io::ErrorKind::Other, "exited with status 1"))
            } else {
                Ok(())
            }
        }
    }

    fn command(line: &str) -> Vec<String> { line.split_whitespace().map(String::from).collect() }

    #[test]
    fn keymap_is_passed_to_the_helper() {
        let mut runner = Recorder::default();
        let mut answers: BTreeMap<String, String> = BTreeMap::new();
        let helper = command("kbd-chooser-apply");

        configure_keyboard(&mut runner, &helper, &answers).unwrap();
        answers.insert("debian-installer/keymap".to_owned(), "de-latin1".to_owned());
        configure_keyboard(&mut runner, &helper, &answers).unwrap();

        assert!(runner.runs[0].1.is_empty());
        assert_eq!(runner.runs[1].1, vec![("KEYMAP".to_owned(), "de-latin1".to_owned())]);
    }

    #[test]
    fn timezone_stops_at_first_failure() {
        let mut runner = Recorder { fail: true, ..Recorder::default() };
        let helpers = vec![command("post-base-installer"), command("clock-setup-apply")];

        match configure_timezone(&mut runner, &helpers) {
            Err(PhaseError::Helper { ref helper, .. }) => assert_eq!(helper, "post-base-installer"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(runner.runs.len(), 1);
    }

    #[test]
    fn hardware_packages_of_kernel() {
        assert_eq!(hardware_packages("2.6.20-16-generic"), [
            "linux-image-2.6.20-16-generic".to_owned(),
            "linux-restricted-modules-2.6.20-16-generic".to_owned(),
        ]);
    }
}
