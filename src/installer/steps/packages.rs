use crate::{
    errors::IoContext,
    installer::{ConfigSource, PhaseError},
    packages::{DependencyCache, PackageCache},
    progress::{CommitProgress, FetchProgress, InstallProgress, ProgressSink},
};
use std::{collections::BTreeSet, fs, io, path::Path};

pub const IGNORE_TIME_CONFLICT: &str = "etc/apt/apt.conf.d/00IgnoreTimeConflict";

const LANGPACKS_TITLE: &str = "ubiquity/langpacks/title";

/// Let apt accept archive signatures from the future, as the clock of the
/// target may not have been set yet.
pub fn write_apt_overrides(target: &Path) -> io::Result<()> {
    let path = target.join(IGNORE_TIME_CONFLICT);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    fs::write(&path, "Acquire::gpgv::Options { \"--ignore-time-conflict\"; };\n")
        .with_context(|why| format!("failed to write {}: {}", path.display(), why))
}

fn split_list(value: &str) -> Vec<String> {
    value.replace(',', " ").split_whitespace().map(String::from).collect()
}

fn language_of(locale: &str) -> &str { locale.split('_').next().unwrap_or(locale) }

/// The languages to install language packs for.
pub fn language_list<A: ConfigSource>(answers: &A) -> Vec<String> {
    for question in &["base-config/language-packs", "pkgsel/language-packs"] {
        let languages = answers.get(question).map(|value| split_list(&value)).unwrap_or_default();
        if !languages.is_empty() {
            return languages;
        }
    }

    let supported = answers
        .get("localechooser/supported-locales")
        .map(|value| {
            split_list(&value)
                .iter()
                .map(|locale| language_of(locale).to_owned())
                .collect::<BTreeSet<String>>()
        })
        .unwrap_or_default();

    if !supported.is_empty() {
        return supported.into_iter().collect();
    }

    answers
        .get("debian-installer/locale")
        .map(|locale| vec![language_of(&locale).to_owned()])
        .unwrap_or_default()
}

/// The packages which provide each language, in order.
pub fn langpack_packages(languages: &[String], patterns: &[String]) -> Vec<String> {
    let mut packages = Vec::new();
    for language in languages {
        packages.push(format!("language-pack-{}", language));
        for pattern in patterns {
            packages.push(pattern.replace("$LL", language));
        }
        packages.push(format!("language-support-{}", language));
    }

    packages
}

/// Install the language packs of the selected languages, recording every
/// package so that the removal of live system packages keeps them.
///
/// The cache is only opened once it is known that there is work to do.
pub fn install_language_packs<A, C, F>(
    answers: &A,
    apt_installed: &Path,
    open_cache: F,
    sink: &mut dyn ProgressSink,
) -> Result<(), PhaseError>
where
    A: ConfigSource,
    C: DependencyCache,
    F: FnOnce() -> io::Result<PackageCache<C>>,
{
    let languages = language_list(answers);
    info!("keeping language packs for: {}", languages.join(" "));

    let patterns = match answers.get("pkgsel/language-pack-patterns") {
        Some(patterns) => split_list(&patterns),
        None => {
            info!("no language pack patterns were selected");
            return Ok(());
        }
    };

    let to_install = langpack_packages(&languages, &patterns);
    ubiquity_utils::append_lines(apt_installed, &to_install)?;

    sink.start(0, 100, LANGPACKS_TITLE);
    let mut cache = match open_cache() {
        Ok(cache) => cache,
        Err(why) => {
            sink.stop();
            return Err(why.into());
        }
    };

    sink.region(10, 100);
    for package in &to_install {
        cache.mark_install(package);
    }

    if let Err(why) = ubiquity_utils::append_lines(apt_installed, &cache.marked_installs()) {
        sink.stop();
        return Err(why.into());
    }

    let committed = {
        let mut progress = CommitProgress::new(
            sink,
            FetchProgress::new(LANGPACKS_TITLE, None, "ubiquity/langpacks/packages"),
            InstallProgress::new(
                LANGPACKS_TITLE,
                "ubiquity/install/apt_info",
                "ubiquity/install/apt_error_install",
            ),
        );
        cache.commit(&mut progress)
    };

    match committed {
        Ok(true) => sink.set(100),
        Ok(false) => warn!("installation of language packs did not complete"),
        Err(why) => {
            sink.stop();
            return Err(why.into());
        }
    }

    sink.stop();
    Ok(())
}

/// Packages of the live system which the installed system does not need,
/// and which were not explicitly installed by this run.
///
/// Without both manifests, there is nothing to remove.
pub fn removable_extras(
    manifest: &Path,
    desktop_manifest: &Path,
    apt_installed: &Path,
) -> io::Result<BTreeSet<String>> {
    if !manifest.exists() || !desktop_manifest.exists() {
        return Ok(BTreeSet::new());
    }

    let live = ubiquity_utils::read_manifest(manifest)?;
    let desktop = ubiquity_utils::read_manifest(desktop_manifest)?;
    let installed = ubiquity_utils::read_line_set(apt_installed)?;

    Ok(live
        .difference(&desktop)
        .filter(|package| !installed.contains(*package))
        .cloned()
        .collect())
}

/// Remove packages which were only needed by the live system.
pub fn remove_extras<C: DependencyCache>(
    extras: BTreeSet<String>,
    cache: &mut PackageCache<C>,
    sink: &mut dyn ProgressSink,
) -> Result<(), PhaseError> {
    if extras.is_empty() {
        return Ok(());
    }

    info!("removing {} packages which are only needed by the live system", extras.len());
    if cache.remove(extras, false, sink)? {
        Ok(())
    } else {
        Err(PhaseError::Incomplete { what: "removal of live system packages" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        packages::DpkgCache,
        progress::{ProgressEvent, ProgressRecorder},
    };
    use std::collections::BTreeMap;
    use tempdir::TempDir;

    fn answers(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|&(k, v)| (k.to_owned(), v.to_owned())).collect()
    }

    #[test]
    fn languages_from_the_first_answer_given() {
        let given = answers(&[
            ("base-config/language-packs", ""),
            ("pkgsel/language-packs", "de, fr"),
            ("debian-installer/locale", "es_ES.UTF-8"),
        ]);
        assert_eq!(language_list(&given), vec!["de", "fr"]);

        let given = answers(&[
            ("localechooser/supported-locales", "pt_BR.UTF-8, en_GB.UTF-8 pt_PT.UTF-8"),
            ("debian-installer/locale", "es_ES.UTF-8"),
        ]);
        assert_eq!(language_list(&given), vec!["en", "pt"]);

        let given = answers(&[("debian-installer/locale", "es_ES.UTF-8")]);
        assert_eq!(language_list(&given), vec!["es"]);

        assert!(language_list(&answers(&[])).is_empty());
    }

    #[test]
    fn packages_for_each_language() {
        let languages = vec!["de".to_owned()];
        let patterns =
            vec!["language-pack-gnome-$LL".to_owned(), "openoffice.org-l10n-$LL".to_owned()];
        assert_eq!(langpack_packages(&languages, &patterns), vec![
            "language-pack-de",
            "language-pack-gnome-de",
            "openoffice.org-l10n-de",
            "language-support-de",
        ]);
    }

    #[test]
    fn no_patterns_installs_nothing() {
        let dir = TempDir::new("langpacks").unwrap();
        let record = dir.path().join("apt-installed");
        let mut sink = ProgressRecorder::new();
        let given = answers(&[("pkgsel/language-packs", "de")]);

        install_language_packs(
            &given,
            &record,
            || -> io::Result<PackageCache<DpkgCache>> { panic!("cache should not be opened") },
            &mut sink,
        )
        .unwrap();

        assert!(!record.exists());
        assert!(sink.events.is_empty());
    }

    #[test]
    fn language_packs_are_recorded_before_commit() {
        let dir = TempDir::new("langpacks").unwrap();
        let record = dir.path().join("apt-installed");
        let mut sink = ProgressRecorder::new();
        let given = answers(&[
            ("pkgsel/language-packs", "de"),
            ("pkgsel/language-pack-patterns", "language-pack-gnome-$LL"),
        ]);

        let available = "Package: language-pack-de\nVersion: 1.0\nDepends: language-pack-de-base\n\n\
                         Package: language-pack-de-base\nVersion: 1.0\n";

        // The cache cannot commit, so the phase fails after recording.
        let result = install_language_packs(
            &given,
            &record,
            || Ok(PackageCache::new(DpkgCache::from_control("", &[available]))),
            &mut sink,
        );
        assert!(result.is_err());

        let recorded = fs::read_to_string(&record).unwrap();
        assert_eq!(
            recorded,
            "language-pack-de\nlanguage-pack-gnome-de\nlanguage-support-de\n\
             language-pack-de\nlanguage-pack-de-base\n"
        );
        assert_eq!(sink.events[0], ProgressEvent::Start {
            min:   0,
            max:   100,
            title: LANGPACKS_TITLE.into(),
        });
        assert_eq!(sink.events[1], ProgressEvent::Region { start: 10, end: 100 });
        assert_eq!(sink.events.last(), Some(&ProgressEvent::Stop));
    }

    #[test]
    fn extras_exclude_desktop_and_installed_packages() {
        let dir = TempDir::new("manifests").unwrap();
        let manifest = dir.path().join("filesystem.manifest");
        let desktop = dir.path().join("filesystem.manifest-desktop");
        let installed = dir.path().join("apt-installed");

        assert!(removable_extras(&manifest, &desktop, &installed).unwrap().is_empty());

        fs::write(&manifest, "# live\nubiquity 1.0\ncasper 1.0\nbash 4.0\nlanguage-pack-de 1.0\n")
            .unwrap();
        fs::write(&desktop, "bash 4.0\n").unwrap();
        fs::write(&installed, "language-pack-de\n").unwrap();

        let extras = removable_extras(&manifest, &desktop, &installed).unwrap();
        assert_eq!(extras.into_iter().collect::<Vec<_>>(), vec!["casper", "ubiquity"]);
    }

    #[test]
    fn nothing_to_remove_emits_nothing() {
        let mut cache = PackageCache::new(DpkgCache::from_control("", &[]));
        let mut sink = ProgressRecorder::new();
        remove_extras(BTreeSet::new(), &mut cache, &mut sink).unwrap();
        assert!(sink.events.is_empty());
    }

    #[test]
    fn overrides_are_written() {
        let dir = TempDir::new("target").unwrap();
        write_apt_overrides(dir.path()).unwrap();
        let written = fs::read_to_string(dir.path().join(IGNORE_TIME_CONFLICT)).unwrap();
        assert!(written.contains("--ignore-time-conflict"));
    }
}
