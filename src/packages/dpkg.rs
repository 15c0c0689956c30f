//! A package database read from dpkg's status file and apt's package lists.

use super::{AptRunner, CommitError, DependencyCache, MarkError, PackageState};
use crate::progress::CommitProgress;
use std::{
    cmp::Ordering,
    collections::{BTreeMap, BTreeSet},
    fs, io, mem,
    path::{Path, PathBuf},
};

const STATUS: &str = "var/lib/dpkg/status";
const LISTS: &str = "var/lib/apt/lists";

/// A single stanza of a Debian control file, keyed by field name.
pub type Stanza = BTreeMap<String, String>;

/// Split a Debian control file into its stanzas.
///
/// Continuation lines are appended to the preceding field, separated by a newline.
pub fn parse_control(input: &str) -> Vec<Stanza> {
    let mut stanzas = Vec::new();
    let mut current = Stanza::new();
    let mut last_key: Option<String> = None;

    for line in input.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                stanzas.push(mem::replace(&mut current, Stanza::new()));
            }
            last_key = None;
        } else if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(value) = last_key.as_ref().and_then(|key| current.get_mut(key)) {
                value.push('\n');
                value.push_str(line.trim());
            }
        } else if let Some(pos) = line.find(':') {
            let key = line[..pos].to_owned();
            current.insert(key.clone(), line[pos + 1..].trim().to_owned());
            last_key = Some(key);
        }
    }

    if !current.is_empty() {
        stanzas.push(current);
    }

    stanzas
}

/// Parse a relationship field into groups of alternatives, discarding
/// version constraints, architecture qualifiers, and restrictions.
fn parse_relations(field: &str) -> Vec<Vec<String>> {
    field
        .split(',')
        .map(|group| {
            group
                .split('|')
                .filter_map(|alternative| {
                    let name = alternative
                        .trim()
                        .split(|c: char| c.is_whitespace() || c == '(' || c == '[' || c == '<')
                        .next()?;
                    let name = name.split(':').next()?;
                    if name.is_empty() {
                        None
                    } else {
                        Some(name.to_owned())
                    }
                })
                .collect::<Vec<String>>()
        })
        .filter(|group| !group.is_empty())
        .collect()
}

fn status_is_installed(status: &str) -> bool {
    match status.split_whitespace().nth(2) {
        Some("installed") | Some("half-configured") | Some("unpacked") | Some("half-installed")
        | Some("triggers-awaited") | Some("triggers-pending") => true,
        _ => false,
    }
}

#[derive(Clone, Debug, Default)]
struct Record {
    version:   String,
    essential: bool,
    depends:   Vec<Vec<String>>,
    provides:  Vec<String>,
}

impl Record {
    fn from_stanza(stanza: &Stanza) -> Record {
        let relations = |field: &str| {
            stanza.get(field).map(|value| parse_relations(value)).unwrap_or_default()
        };

        let mut depends = relations("Pre-Depends");
        depends.extend(relations("Depends"));

        Record {
            version: stanza.get("Version").cloned().unwrap_or_default(),
            essential: stanza.get("Essential").map_or(false, |value| value == "yes"),
            depends,
            provides: relations("Provides").into_iter().flatten().collect(),
        }
    }
}

/// Compare two Debian package versions, as dpkg does.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let (a_epoch, a_upstream, a_revision) = split_version(a);
    let (b_epoch, b_upstream, b_revision) = split_version(b);

    a_epoch
        .cmp(&b_epoch)
        .then_with(|| compare_fragment(a_upstream, b_upstream))
        .then_with(|| compare_fragment(a_revision, b_revision))
}

fn split_version(version: &str) -> (u64, &str, &str) {
    let (epoch, rest) = match version.find(':') {
        Some(pos) => (version[..pos].parse().unwrap_or(0), &version[pos + 1..]),
        None => (0, version),
    };

    match rest.rfind('-') {
        Some(pos) => (epoch, &rest[..pos], &rest[pos + 1..]),
        None => (epoch, rest, ""),
    }
}

/// The sort weight of a non-digit character: `~` sorts before everything,
/// even the end of the string, and letters sort before other symbols.
fn weight(c: Option<u8>) -> i32 {
    match c {
        None => 0,
        Some(b'~') => -1,
        Some(c) if c.is_ascii_digit() => 0,
        Some(c) if c.is_ascii_alphabetic() => i32::from(c),
        Some(c) => i32::from(c) + 256,
    }
}

fn compare_fragment(a: &str, b: &str) -> Ordering {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    let (mut i, mut j) = (0, 0);
    let is_digit = |s: &[u8], k: usize| s.get(k).map_or(false, u8::is_ascii_digit);

    while i < a.len() || j < b.len() {
        while (i < a.len() && !is_digit(a, i)) || (j < b.len() && !is_digit(b, j)) {
            let (wa, wb) = (weight(a.get(i).cloned()), weight(b.get(j).cloned()));
            if wa != wb {
                return wa.cmp(&wb);
            }
            i += 1;
            j += 1;
        }

        while a.get(i) == Some(&b'0') {
            i += 1;
        }
        while b.get(j) == Some(&b'0') {
            j += 1;
        }

        let mut first_difference = Ordering::Equal;
        while is_digit(a, i) && is_digit(b, j) {
            if first_difference == Ordering::Equal {
                first_difference = a[i].cmp(&b[j]);
            }
            i += 1;
            j += 1;
        }

        if is_digit(a, i) {
            return Ordering::Greater;
        }
        if is_digit(b, j) {
            return Ordering::Less;
        }
        if first_difference != Ordering::Equal {
            return first_difference;
        }
    }

    Ordering::Equal
}

/// A dependency cache over the dpkg database of a root file system.
#[derive(Debug, Default)]
pub struct DpkgCache {
    root:      PathBuf,
    installed: BTreeMap<String, Record>,
    available: BTreeMap<String, Record>,
    providers: BTreeMap<String, BTreeSet<String>>,
    marks:     BTreeMap<String, PackageState>,
    purge:     BTreeSet<String>,
    pulled:    BTreeMap<String, Vec<String>>,
    apt:       Option<AptRunner>,
}

impl DpkgCache {
    /// Read the package database of the system at `root`, committing
    /// changes through `apt`.
    pub fn open(root: &Path, apt: AptRunner) -> io::Result<Self> {
        let mut cache = DpkgCache { root: root.to_path_buf(), apt: Some(apt), ..Default::default() };
        cache.reload()?;
        Ok(cache)
    }

    /// A cache built from the contents of a status file and package lists,
    /// which cannot commit.
    pub fn from_control(status: &str, available: &[&str]) -> Self {
        let mut cache = DpkgCache::default();
        cache.index(status, available.iter().cloned());
        cache
    }

    fn reload(&mut self) -> io::Result<()> {
        let status = fs::read_to_string(self.root.join(STATUS))?;

        let mut lists = Vec::new();
        match fs::read_dir(self.root.join(LISTS)) {
            Ok(entries) => {
                for entry in entries {
                    let path = entry?.path();
                    let is_index = path
                        .file_name()
                        .and_then(|name| name.to_str())
                        .map_or(false, |name| name.ends_with("_Packages"));
                    if is_index {
                        lists.push(fs::read_to_string(&path)?);
                    }
                }
            }
            Err(ref why) if why.kind() == io::ErrorKind::NotFound => (),
            Err(why) => return Err(why),
        }

        lists.sort();
        self.index(&status, lists.iter().map(String::as_str));
        info!(
            "package database at {}: {} installed, {} available",
            self.root.display(),
            self.installed.len(),
            self.available.len()
        );
        Ok(())
    }

    fn index<'a, I: Iterator<Item = &'a str>>(&mut self, status: &str, available: I) {
        self.installed.clear();
        self.available.clear();
        self.providers.clear();
        self.marks.clear();
        self.purge.clear();
        self.pulled.clear();

        for stanza in parse_control(status) {
            let installed = stanza.get("Status").map_or(false, |status| status_is_installed(status));
            if let (true, Some(name)) = (installed, stanza.get("Package")) {
                self.installed.insert(name.clone(), Record::from_stanza(&stanza));
            }
        }

        for list in available {
            for stanza in parse_control(list) {
                if let Some(name) = stanza.get("Package") {
                    self.available.entry(name.clone()).or_insert_with(|| Record::from_stanza(&stanza));
                }
            }
        }

        let records = self.installed.iter().chain(self.available.iter());
        for (name, record) in records {
            for virtual_package in &record.provides {
                self.providers
                    .entry(virtual_package.clone())
                    .or_default()
                    .insert(name.clone());
            }
        }
    }

    /// Whether the package will be installed once the marks are applied.
    fn will_be_installed(&self, package: &str) -> bool {
        match self.marks.get(package) {
            Some(PackageState::MarkedInstall) => true,
            Some(PackageState::MarkedRemove) => false,
            _ => self.installed.contains_key(package),
        }
    }

    fn satisfies(&self, alternative: &str) -> bool {
        self.will_be_installed(alternative)
            || self.providers.get(alternative).map_or(false, |providers| {
                providers.iter().any(|provider| self.will_be_installed(provider))
            })
    }

    fn record(&self, package: &str) -> Option<&Record> {
        if self.marks.get(package) == Some(&PackageState::MarkedInstall) {
            self.available.get(package).or_else(|| self.installed.get(package))
        } else {
            self.installed.get(package).or_else(|| self.available.get(package))
        }
    }

    /// The first alternative of a group that could be installed.
    fn candidate(&self, group: &[String]) -> Option<String> {
        group.iter().find_map(|alternative| {
            if self.available.contains_key(alternative) || self.installed.contains_key(alternative) {
                Some(alternative.clone())
            } else {
                self.providers.get(alternative).and_then(|providers| providers.iter().next().cloned())
            }
        })
    }

    fn mark_install_with(&mut self, package: &str, pulled: &mut Vec<String>) -> Result<(), MarkError> {
        if self.will_be_installed(package) {
            return Ok(());
        }

        if self.installed.contains_key(package) {
            self.marks.remove(package);
            self.purge.remove(package);
            return Ok(());
        }

        let depends = match self.available.get(package) {
            Some(record) => record.depends.clone(),
            None => return Err(MarkError::NotFound { package: package.into() }),
        };

        self.marks.insert(package.to_owned(), PackageState::MarkedInstall);
        pulled.push(package.to_owned());
        self.mark_dependencies(package, depends, pulled)
    }

    fn mark_dependencies(
        &mut self,
        package: &str,
        depends: Vec<Vec<String>>,
        pulled: &mut Vec<String>,
    ) -> Result<(), MarkError> {
        for group in depends {
            if group.iter().any(|alternative| self.satisfies(alternative)) {
                continue;
            }

            match self.candidate(&group) {
                Some(dependency) => self.mark_install_with(&dependency, pulled)?,
                None => {
                    return Err(MarkError::Unsatisfiable {
                        package:    package.into(),
                        dependency: group.join(" | "),
                    })
                }
            }
        }

        Ok(())
    }

    fn removals(&self) -> Vec<(String, bool)> {
        self.marks
            .iter()
            .filter(|&(_, &state)| state == PackageState::MarkedRemove)
            .map(|(package, _)| (package.clone(), self.purge.contains(package)))
            .collect()
    }

    fn installs(&self) -> Vec<String> {
        self.marks
            .iter()
            .filter(|&(_, &state)| state == PackageState::MarkedInstall)
            .map(|(package, _)| package.clone())
            .collect()
    }

    fn runner(&self) -> Result<&AptRunner, CommitError> {
        self.apt.as_ref().ok_or_else(|| CommitError::Io {
            why: io::Error::new(io::ErrorKind::NotFound, "package database has no package manager"),
        })
    }
}

impl DependencyCache for DpkgCache {
    fn contains(&self, package: &str) -> bool {
        self.installed.contains_key(package) || self.available.contains_key(package)
    }

    fn is_installed(&self, package: &str) -> bool { self.installed.contains_key(package) }

    fn is_upgradable(&self, package: &str) -> bool {
        match (self.installed.get(package), self.available.get(package)) {
            (Some(installed), Some(available)) => {
                compare_versions(&available.version, &installed.version) == Ordering::Greater
            }
            _ => false,
        }
    }

    fn state(&self, package: &str) -> Option<PackageState> {
        if self.contains(package) {
            Some(self.marks.get(package).cloned().unwrap_or(PackageState::Keep))
        } else {
            None
        }
    }

    fn mark_install(&mut self, package: &str) -> Result<(), MarkError> {
        let mut pulled = Vec::new();
        let result = self.mark_install_with(package, &mut pulled);
        self.pulled.insert(package.to_owned(), pulled);
        result
    }

    fn mark_upgrade(&mut self, package: &str) -> Result<(), MarkError> {
        if !self.is_upgradable(package) {
            return Ok(());
        }

        let depends = self.available.get(package).map(|record| record.depends.clone());
        let mut pulled = vec![package.to_owned()];
        self.marks.insert(package.to_owned(), PackageState::MarkedInstall);
        let result = self.mark_dependencies(package, depends.unwrap_or_default(), &mut pulled);
        self.pulled.insert(package.to_owned(), pulled);
        result
    }

    fn mark_delete(&mut self, package: &str, purge: bool) -> Result<(), MarkError> {
        let record = match self.installed.get(package) {
            Some(record) => record,
            None if self.available.contains_key(package) => {
                self.marks.remove(package);
                return Ok(());
            }
            None => return Err(MarkError::NotFound { package: package.into() }),
        };

        if record.essential {
            return Err(MarkError::Essential { package: package.into() });
        }

        self.marks.insert(package.to_owned(), PackageState::MarkedRemove);
        if purge {
            self.purge.insert(package.to_owned());
        }

        Ok(())
    }

    fn mark_keep(&mut self, package: &str) {
        self.marks.remove(package);
        self.purge.remove(package);
        for dependency in self.pulled.remove(package).unwrap_or_default() {
            if self.marks.get(&dependency) == Some(&PackageState::MarkedInstall) {
                self.marks.remove(&dependency);
            }
        }
    }

    fn broken_packages(&self) -> BTreeSet<String> {
        let candidates = self.installed.keys().chain(
            self.marks
                .iter()
                .filter(|&(_, &state)| state == PackageState::MarkedInstall)
                .map(|(package, _)| package),
        );

        candidates
            .filter(|package| self.will_be_installed(package))
            .filter(|package| {
                self.record(package).map_or(false, |record| {
                    record.depends.iter().any(|group| !group.iter().any(|alt| self.satisfies(alt)))
                })
            })
            .cloned()
            .collect()
    }

    fn changes(&self) -> Vec<(String, PackageState)> {
        self.marks
            .iter()
            .filter(|&(_, &state)| state != PackageState::Keep)
            .map(|(package, &state)| (package.clone(), state))
            .collect()
    }

    fn update(&mut self, progress: &mut CommitProgress) -> Result<bool, CommitError> {
        if !self.runner()?.update(progress)? {
            return Ok(false);
        }

        self.reload()?;
        Ok(true)
    }

    fn commit(&mut self, progress: &mut CommitProgress) -> Result<bool, CommitError> {
        let (installs, removals) = (self.installs(), self.removals());
        if !self.runner()?.apply(&installs, &removals, progress)? {
            return Ok(false);
        }

        self.reload()?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn version_ordering() {
        let ordered = [
            "1.0~rc1", "1.0", "1.0-1", "1.0-2", "1.0a", "1.0+1", "1.2", "1.10", "1:0.1",
        ];
        for pair in ordered.windows(2) {
            assert_eq!(compare_versions(pair[0], pair[1]), Ordering::Less, "{:?}", pair);
            assert_eq!(compare_versions(pair[1], pair[0]), Ordering::Greater, "{:?}", pair);
        }
        assert_eq!(compare_versions("2.07-1ubuntu1", "2.07-1ubuntu1"), Ordering::Equal);
        assert_eq!(compare_versions("1.01", "1.1"), Ordering::Equal);
    }

    #[test]
    fn control_continuations() {
        let stanzas = parse_control(
            "Package: casper\nDescription: live boot\n hooks for the live system\n .\n\n\nPackage: b\n",
        );
        assert_eq!(stanzas.len(), 2);
        assert_eq!(stanzas[0]["Description"], "live boot\nhooks for the live system\n.");
        assert_eq!(stanzas[1]["Package"], "b");
    }

    #[test]
    fn relations_discard_constraints() {
        assert_eq!(
            parse_relations("libc6 (>= 2.7), gawk | mawk:any [amd64], perl:any <!nocheck>,"),
            vec![
                vec!["libc6".to_owned()],
                vec!["gawk".to_owned(), "mawk".to_owned()],
                vec!["perl".to_owned()],
            ]
        );
    }

    const STATUS_TEXT: &str = "\
Package: old-config
Status: deinstall ok config-files
Version: 1.0

Package: mail-transport
Status: install ok installed
Version: 1.0
Provides: mail-transport-agent

Package: mailer
Status: install ok installed
Version: 1.0
Pre-Depends: mail-transport-agent
";

    #[test]
    fn config_files_are_not_installed() {
        let cache = DpkgCache::from_control(STATUS_TEXT, &[]);
        assert!(!cache.is_installed("old-config"));
        assert!(!cache.contains("old-config"));
        assert!(cache.is_installed("mailer"));
    }

    #[test]
    fn virtual_packages_satisfy_dependencies() {
        let mut cache = DpkgCache::from_control(STATUS_TEXT, &[]);
        assert_eq!(cache.broken_count(), 0);
        cache.mark_delete("mail-transport", false).unwrap();
        assert_eq!(cache.broken_packages(), vec!["mailer".to_owned()].into_iter().collect());
        cache.mark_keep("mail-transport");
        assert_eq!(cache.broken_count(), 0);
    }

    #[test]
    fn keep_reverts_pulled_dependencies() {
        let available = "Package: a\nDepends: b\n\nPackage: b\nDepends: mail-transport-agent\n";
        let mut cache = DpkgCache::from_control(STATUS_TEXT, &[available]);
        cache.mark_install("a").unwrap();
        assert_eq!(cache.installs(), vec!["a".to_owned(), "b".to_owned()]);
        cache.mark_keep("a");
        assert!(cache.changes().is_empty());
    }

    #[test]
    fn removal_of_uninstalled_is_a_noop() {
        let mut cache = DpkgCache::from_control(STATUS_TEXT, &["Package: extra\n"]);
        cache.mark_delete("extra", true).unwrap();
        assert!(cache.changes().is_empty());
        assert!(cache.mark_delete("nothing", true).is_err());
    }

    #[test]
    fn open_reads_status_and_lists() {
        let root = TempDir::new("dpkg").unwrap();
        let root = root.path();
        fs::create_dir_all(root.join("var/lib/dpkg")).unwrap();
        fs::create_dir_all(root.join(LISTS)).unwrap();
        fs::write(root.join(STATUS), STATUS_TEXT).unwrap();
        fs::write(
            root.join(LISTS).join("archive.ubuntu.com_dists_main_binary-amd64_Packages"),
            "Package: mailer\nVersion: 1.1\n",
        )
        .unwrap();
        fs::write(root.join(LISTS).join("lock"), "").unwrap();

        let cache = DpkgCache::open(root, AptRunner::new(root)).unwrap();
        assert!(cache.is_installed("mail-transport"));
        assert!(cache.is_upgradable("mailer"));
        assert!(!cache.is_upgradable("mail-transport"));
    }

    #[test]
    fn commit_without_package_manager_fails() {
        use crate::progress::{FetchProgress, InstallProgress, ProgressRecorder};

        let mut cache = DpkgCache::from_control(STATUS_TEXT, &[]);
        let mut sink = ProgressRecorder::new();
        let mut progress = CommitProgress::new(
            &mut sink,
            FetchProgress::new("title", None, "fetch"),
            InstallProgress::new("title", "info", "error"),
        );
        cache.mark_delete("mailer", true).unwrap();
        assert!(cache.commit(&mut progress).is_err());
    }
}
