use crate::{errors::IoContext, packages::AptEnvironment};
use envfile::EnvFile;
use std::{
    ffi::CStr,
    io, mem,
    path::{Path, PathBuf},
};

/// Refresh the installer's own packages after the source is mounted.
pub const CHECK_FOR_UPDATES: u8 = 0b01;

/// Command lines of the external helpers which apply each part of the
/// configuration to the target.
#[derive(Clone, Debug, PartialEq)]
pub struct Helpers {
    pub locales:       Vec<String>,
    pub apt_setup:     Vec<String>,
    pub timezone:      Vec<Vec<String>>,
    pub keyboard:      Vec<String>,
    pub user_setup:    Vec<String>,
    pub check_kernels: Vec<String>,
    /// Tried in order; the first whose program exists is used.
    pub bootloaders:   Vec<Vec<String>>,
}

fn command(line: &str) -> Vec<String> { line.split_whitespace().map(String::from).collect() }

impl Default for Helpers {
    fn default() -> Self {
        Helpers {
            locales:       command("/usr/lib/ubiquity/localechooser-apply"),
            apt_setup:     command("/usr/share/ubiquity/apt-setup"),
            timezone:      vec![
                command("/usr/lib/ubiquity/tzsetup/post-base-installer"),
                command("/usr/share/ubiquity/clock-setup-apply"),
            ],
            keyboard:      command("/usr/share/ubiquity/kbd-chooser-apply"),
            user_setup:    command("/usr/lib/ubiquity/user-setup/user-setup-apply /target"),
            check_kernels: command("/usr/share/ubiquity/check-kernels"),
            bootloaders:   vec![
                command("/usr/lib/ubiquity/grub-installer/grub-installer /target"),
                command("/usr/lib/ubiquity/yaboot-installer/yaboot-installer /target"),
            ],
        }
    }
}

/// Installer configuration
#[derive(Clone, Debug)]
pub struct Config {
    /// The live file system which is copied to the target.
    pub source:           PathBuf,
    /// Where the target's root file system is mounted.
    pub target:           PathBuf,
    /// Release of the running kernel, whose images are preferred on the target.
    pub kernel_version:   String,
    /// Scripts which repeat parts of the live system's configuration on the target.
    pub hook_dir:         PathBuf,
    /// Packages explicitly installed by this run.
    pub apt_installed:    PathBuf,
    /// Kernel packages flagged as unusable by the classifier.
    pub remove_kernels:   PathBuf,
    pub manifest:         PathBuf,
    pub manifest_desktop: PathBuf,
    pub syslog:           PathBuf,
    /// Images which may be mounted as the source, in order of preference.
    pub source_images:    Vec<PathBuf>,
    /// Place kernel symlinks in `/boot` rather than the root of the target.
    pub link_in_boot:     bool,
    pub flags:            u8,
    pub helpers:          Helpers,
    pub apt_environment:  AptEnvironment,
}

impl Default for Config {
    fn default() -> Self {
        let source = if Path::new("/rofs").is_dir() { "/rofs" } else { "/source" };

        Config {
            source:           PathBuf::from(source),
            target:           PathBuf::from("/target"),
            kernel_version:   running_kernel().unwrap_or_default(),
            hook_dir:         PathBuf::from("/usr/lib/ubiquity/target-config"),
            apt_installed:    PathBuf::from("/var/lib/ubiquity/apt-installed"),
            remove_kernels:   PathBuf::from("/var/lib/ubiquity/remove-kernels"),
            manifest:         PathBuf::from("/cdrom/casper/filesystem.manifest"),
            manifest_desktop: PathBuf::from("/cdrom/casper/filesystem.manifest-desktop"),
            syslog:           PathBuf::from("/var/log/installer/syslog"),
            source_images:    vec![
                PathBuf::from("/cdrom/casper/filesystem.cloop"),
                PathBuf::from("/cdrom/casper/filesystem.squashfs"),
                PathBuf::from("/cdrom/META/META.squashfs"),
            ],
            link_in_boot:     false,
            flags:            0,
            helpers:          Helpers::default(),
            apt_environment:  AptEnvironment::default(),
        }
    }
}

fn is_true(value: &str) -> bool {
    match value {
        "1" | "true" | "yes" => true,
        _ => false,
    }
}

impl Config {
    /// The default configuration, with any fields overridden by the
    /// `KEY=value` pairs of the file at `path`.
    pub fn load(path: &Path) -> io::Result<Config> {
        let env = EnvFile::new(path)
            .with_context(|why| format!("error parsing config at {}: {}", path.display(), why))?;

        let mut config = Config::default();
        {
            let mut set_path = |key: &str, field: &mut PathBuf| {
                if let Some(value) = env.get(key) {
                    *field = PathBuf::from(value);
                }
            };

            set_path("SOURCE", &mut config.source);
            set_path("TARGET", &mut config.target);
            set_path("HOOK_DIR", &mut config.hook_dir);
            set_path("APT_INSTALLED", &mut config.apt_installed);
            set_path("REMOVE_KERNELS", &mut config.remove_kernels);
            set_path("MANIFEST", &mut config.manifest);
            set_path("MANIFEST_DESKTOP", &mut config.manifest_desktop);
            set_path("SYSLOG", &mut config.syslog);
        }

        if let Some(version) = env.get("KERNEL_VERSION") {
            config.kernel_version = version.to_owned();
        }

        if let Some(value) = env.get("LINK_IN_BOOT") {
            config.link_in_boot = is_true(value);
        }

        if let Some(value) = env.get("CHECK_FOR_UPDATES") {
            if is_true(value) {
                config.flags |= CHECK_FOR_UPDATES;
            } else {
                config.flags &= !CHECK_FOR_UPDATES;
            }
        }

        {
            let helpers = &mut config.helpers;
            let mut set_helper = |key: &str, field: &mut Vec<String>| {
                if let Some(value) = env.get(key) {
                    *field = command(value);
                }
            };

            set_helper("LOCALES_HELPER", &mut helpers.locales);
            set_helper("APT_SETUP_HELPER", &mut helpers.apt_setup);
            set_helper("KEYBOARD_HELPER", &mut helpers.keyboard);
            set_helper("USER_SETUP_HELPER", &mut helpers.user_setup);
            set_helper("CHECK_KERNELS_HELPER", &mut helpers.check_kernels);
        }

        Ok(config)
    }

    /// Whether the source must be mounted before it can be copied, rather
    /// than being the running live root.
    pub fn mounts_source(&self) -> bool { self.source == Path::new("/source") }

    pub fn check_for_updates(&self) -> bool { self.flags & CHECK_FOR_UPDATES != 0 }

    /// Resolve an absolute path within the target.
    pub fn target_path<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        let path = path.as_ref();
        self.target.join(path.strip_prefix("/").unwrap_or(path))
    }
}

/// The release of the running kernel, as reported by `uname`.
pub fn running_kernel() -> Option<String> {
    unsafe {
        let mut name: libc::utsname = mem::zeroed();
        if libc::uname(&mut name) != 0 {
            return None;
        }

        Some(CStr::from_ptr(name.release.as_ptr()).to_string_lossy().into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempdir::TempDir;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.target, Path::new("/target"));
        assert_eq!(config.mounts_source(), !Path::new("/rofs").is_dir());
        assert!(!config.check_for_updates());
        assert_eq!(config.target_path("/etc/hostname"), Path::new("/target/etc/hostname"));
        assert_eq!(config.helpers.bootloaders.len(), 2);
    }

    #[test]
    fn kernel_release() {
        assert!(!running_kernel().unwrap().is_empty());
    }

    #[test]
    fn load_overrides() {
        let dir = TempDir::new("conf").unwrap();
        let path = dir.path().join("install.conf");
        fs::write(
            &path,
            "TARGET=/mnt/target\nKERNEL_VERSION=2.6.20-16-generic\nCHECK_FOR_UPDATES=1\n\
             LINK_IN_BOOT=true\nAPT_SETUP_HELPER=/bin/true --quiet\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.target, Path::new("/mnt/target"));
        assert_eq!(config.kernel_version, "2.6.20-16-generic");
        assert!(config.check_for_updates());
        assert!(config.link_in_boot);
        assert_eq!(config.helpers.apt_setup, vec!["/bin/true".to_owned(), "--quiet".to_owned()]);
        assert_eq!(config.helpers.locales, Helpers::default().locales);
        assert_eq!(config.syslog, Path::new("/var/log/installer/syslog"));
    }
}
