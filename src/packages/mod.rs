//! Dependency-safe installation and removal of packages.
//!
//! A [`DependencyCache`] is the tentative selection of a package database:
//! packages may be marked for installation or removal, and the cache reports
//! how many installed packages would be left with unsatisfied dependencies.
//! [`PackageCache`] guarantees that no mutation it makes leaves that count
//! above zero, reverting any mark that would.

mod apt;
mod dpkg;

pub use self::{apt::*, dpkg::*};

use crate::progress::{CommitProgress, FetchProgress, InstallProgress, ProgressSink};
use std::{collections::BTreeSet, io};

/// The tentative state of a package in the current selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PackageState {
    Keep,
    MarkedInstall,
    MarkedRemove,
}

#[derive(Debug, Fail)]
pub enum MarkError {
    #[fail(display = "package {} is not known to the package database", package)]
    NotFound { package: String },
    #[fail(display = "{} depends on {}, which cannot be installed", package, dependency)]
    Unsatisfiable { package: String, dependency: String },
    #[fail(display = "{} is an essential package", package)]
    Essential { package: String },
}

#[derive(Debug, Fail)]
pub enum CommitError {
    #[fail(display = "package manager I/O error: {}", why)]
    Io { why: io::Error },
    #[fail(display = "{} failed: {}", command, why)]
    Subprocess { command: String, why: io::Error },
}

impl From<io::Error> for CommitError {
    fn from(why: io::Error) -> CommitError { CommitError::Io { why } }
}

/// A dependency-resolving package database with a tentative selection.
pub trait DependencyCache {
    /// Whether the package is known to the database at all.
    fn contains(&self, package: &str) -> bool;

    /// Whether the package is currently installed, regardless of any marks.
    fn is_installed(&self, package: &str) -> bool;

    /// Whether a newer version of an installed package is available.
    fn is_upgradable(&self, package: &str) -> bool;

    /// The mark on a known package.
    fn state(&self, package: &str) -> Option<PackageState>;

    fn mark_install(&mut self, package: &str) -> Result<(), MarkError>;

    /// Mark an installed package for upgrade to its available version.
    fn mark_upgrade(&mut self, package: &str) -> Result<(), MarkError>;

    fn mark_delete(&mut self, package: &str, purge: bool) -> Result<(), MarkError>;

    /// Reset a package, and anything marked on its behalf, to `Keep`.
    fn mark_keep(&mut self, package: &str);

    /// Installed or to-be-installed packages whose dependencies are unsatisfied.
    fn broken_packages(&self) -> BTreeSet<String>;

    fn broken_count(&self) -> usize { self.broken_packages().len() }

    /// Every package which is not marked `Keep`.
    fn changes(&self) -> Vec<(String, PackageState)>;

    /// Refresh the package indices, returning `false` if the refresh should be retried.
    fn update(&mut self, progress: &mut CommitProgress) -> Result<bool, CommitError>;

    /// Fetch and apply the marked changes, returning `false` on a soft failure.
    fn commit(&mut self, progress: &mut CommitProgress) -> Result<bool, CommitError>;
}

/// Makes package changes which never leave the dependency graph broken.
pub struct PackageCache<C: DependencyCache> {
    cache: C,
}

impl<C: DependencyCache> PackageCache<C> {
    pub fn new(cache: C) -> Self { PackageCache { cache } }

    pub fn backend(&self) -> &C { &self.cache }

    pub fn backend_mut(&mut self) -> &mut C { &mut self.cache }

    /// Mark a package for installation, unless it is unknown or already installed.
    ///
    /// If the mark would break dependencies, the package is reset to `Keep`.
    /// Returns whether the package was marked.
    pub fn mark_install(&mut self, package: &str) -> bool {
        if !self.cache.contains(package) || self.cache.is_installed(package) {
            return false;
        }

        let result = self.cache.mark_install(package);
        self.keep_unless_consistent(package, "installing", result)
    }

    /// Mark an installed package for upgrade, with the same guarantees as `mark_install`.
    pub fn mark_upgrade(&mut self, package: &str) -> bool {
        if !self.cache.is_upgradable(package) {
            return false;
        }

        let result = self.cache.mark_upgrade(package);
        self.keep_unless_consistent(package, "upgrading", result)
    }

    fn keep_unless_consistent(
        &mut self,
        package: &str,
        action: &str,
        result: Result<(), MarkError>,
    ) -> bool {
        let marked = match result {
            Ok(()) if self.cache.broken_count() == 0 => true,
            Ok(()) => {
                info!("not {} {}, as it would break dependencies", action, package);
                false
            }
            Err(why) => {
                info!("not {} {}: {}", action, package, why);
                false
            }
        };

        if !marked {
            self.cache.mark_keep(package);
        }

        debug_assert_eq!(self.cache.broken_count(), 0);
        marked
    }

    /// Packages which are marked for installation.
    pub fn marked_installs(&self) -> Vec<String> {
        self.cache
            .changes()
            .into_iter()
            .filter(|&(_, state)| state == PackageState::MarkedInstall)
            .map(|(package, _)| package)
            .collect()
    }

    /// Of the given packages, those which are installed and have a newer version.
    pub fn upgradable<S: AsRef<str>>(&self, packages: &[S]) -> Vec<String> {
        let mut upgradable = Vec::new();
        for package in packages {
            let package = package.as_ref();
            if self.cache.contains(package) && self.cache.is_upgradable(package) {
                upgradable.push(package.to_owned());
            }
        }
        upgradable
    }

    /// Mark one package for removal, along with the packages that its removal
    /// breaks. Either all of them are marked, or none of them are.
    fn mark_removal_of(
        &mut self,
        package: &str,
        requested: &BTreeSet<String>,
        recursive: bool,
    ) -> Option<BTreeSet<String>> {
        if let Err(why) = self.cache.mark_delete(package, true) {
            info!("not removing {}: {}", package, why);
            self.cache.mark_keep(package);
            return None;
        }

        let mut cascaded = BTreeSet::new();
        let mut failed = false;

        loop {
            let broken = self
                .cache
                .broken_packages()
                .into_iter()
                .filter(|broken| !cascaded.contains(broken))
                .collect::<BTreeSet<String>>();

            if broken.is_empty() {
                break;
            }

            // Dependents are only removed alongside when recursion was requested,
            // or when they were going to be removed anyway.
            if !recursive && !broken.is_subset(requested) {
                info!("not removing {}, as {:?} depend on it", package, broken);
                failed = true;
                break;
            }

            for dependent in broken {
                let result = self.cache.mark_delete(&dependent, true);
                cascaded.insert(dependent.clone());
                if let Err(why) = result {
                    info!("not removing {}, as {} cannot be removed: {}", package, dependent, why);
                    failed = true;
                    break;
                }
            }

            if failed {
                break;
            }
        }

        if failed || self.cache.broken_count() > 0 {
            for dependent in &cascaded {
                self.cache.mark_keep(dependent);
            }
            self.cache.mark_keep(package);
            return None;
        }

        cascaded.insert(package.to_owned());
        Some(cascaded)
    }

    /// Repeatedly mark the requested packages for removal until a pass removes
    /// nothing new, returning every package that was marked.
    pub fn mark_removals(&mut self, requested: BTreeSet<String>, recursive: bool) -> BTreeSet<String> {
        let mut remaining = requested;
        let mut removed_total = BTreeSet::new();

        // Every productive pass removes at least one requested package.
        let passes = remaining.len() + 1;
        for _ in 0..passes {
            let mut removed = BTreeSet::new();
            for package in &remaining {
                if !self.cache.is_installed(package) {
                    continue;
                }

                if let Some(marked) = self.mark_removal_of(package, &remaining, recursive) {
                    removed.extend(marked);
                }

                debug_assert_eq!(self.cache.broken_count(), 0);
            }

            if removed.is_empty() {
                return removed_total;
            }

            remaining = remaining.difference(&removed).cloned().collect();
            removed_total.extend(removed);
        }

        warn!("package removal did not settle after {} passes; {:?} remain", passes, remaining);
        removed_total
    }

    /// Fetch and apply the marked changes.
    pub fn commit(&mut self, progress: &mut CommitProgress) -> Result<bool, CommitError> {
        let changes = self.cache.changes();
        if changes.is_empty() {
            info!("no package changes to commit");
            return Ok(true);
        }

        info!("committing package changes: {:?}", changes);
        let result = self.cache.commit(progress);
        progress.finish();
        result
    }

    /// Remove the given packages, and those which depend on them if
    /// `recursive` is set, reporting through a nested progress bar.
    pub fn remove(
        &mut self,
        packages: BTreeSet<String>,
        recursive: bool,
        sink: &mut dyn ProgressSink,
    ) -> Result<bool, CommitError> {
        const TITLE: &str = "ubiquity/install/title";

        sink.start(0, 5, TITLE);
        sink.info("ubiquity/install/find_removables");

        let removed = self.mark_removals(packages, recursive);
        info!("removing packages: {:?}", removed);

        sink.set(1);
        sink.region(1, 5);

        let committed = {
            let mut progress = CommitProgress::new(
                sink,
                FetchProgress::new(TITLE, None, "ubiquity/install/fetch_remove"),
                InstallProgress::new(
                    TITLE,
                    "ubiquity/install/apt_info",
                    "ubiquity/install/apt_error_remove",
                ),
            );
            self.commit(&mut progress)
        };

        match committed {
            Ok(true) => {
                sink.set(5);
                sink.stop();
                Ok(true)
            }
            other => {
                sink.stop();
                other
            }
        }
    }
}
