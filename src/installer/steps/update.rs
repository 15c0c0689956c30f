use crate::{
    installer::PhaseError,
    packages::{DependencyCache, PackageCache},
    progress::{CommitProgress, FetchProgress, InstallProgress, ProgressSink},
};

const TITLE: &str = "ubiquity/update_check/title";

/// The installer's own packages, which are refreshed before installing.
pub const INSTALLER_PACKAGES: &[&str] = &[
    "ubiquity",
    "ubiquity-casper",
    "ubiquity-frontend-gtk",
    "ubiquity-frontend-kde",
    "ubiquity-ubuntu-artwork",
];

fn installer_progress() -> InstallProgress {
    InstallProgress::new(TITLE, "ubiquity/install/apt_info", "ubiquity/install/apt_error_install")
}

/// Refresh the package indices of the live system and upgrade the installer
/// itself, if a newer version is available.
///
/// A refresh or upgrade which the package manager abandons is logged, and
/// the installation carries on with the current version.
pub fn check_for_updated_version<C: DependencyCache>(
    cache: &mut PackageCache<C>,
    sink: &mut dyn ProgressSink,
) -> Result<(), PhaseError> {
    sink.start(0, 100, TITLE);
    sink.region(0, 50);

    let updated = {
        let mut progress = CommitProgress::new(
            sink,
            FetchProgress::new(
                TITLE,
                Some("ubiquity/update_check/apt_indices_starting"),
                "ubiquity/update_check/apt_indices",
            ),
            installer_progress(),
        );

        let result = cache.backend_mut().update(&mut progress);
        progress.finish();
        result
    };

    match updated {
        Ok(true) => (),
        Ok(false) => {
            warn!("refreshing the package indices did not complete; not checking for updates");
            sink.stop();
            return Ok(());
        }
        Err(why) => {
            sink.stop();
            return Err(why.into());
        }
    }

    sink.set(50);
    let upgradable = cache.upgradable(INSTALLER_PACKAGES);
    if upgradable.is_empty() {
        info!("the installer is up to date");
        sink.stop();
        return Ok(());
    }

    info!("upgrading installer packages: {:?}", upgradable);
    for package in &upgradable {
        cache.mark_upgrade(package);
    }

    sink.region(50, 100);
    let committed = {
        let mut progress = CommitProgress::new(
            sink,
            FetchProgress::new(TITLE, None, "ubiquity/langpacks/packages"),
            installer_progress(),
        );
        cache.commit(&mut progress)
    };

    match committed {
        Ok(true) => sink.set(100),
        Ok(false) => warn!("upgrading the installer did not complete"),
        Err(why) => {
            sink.stop();
            return Err(why.into());
        }
    }

    sink.stop();
    Ok(())
}
