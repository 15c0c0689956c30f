//! Applies package changes to a target root by running `apt-get`, and
//! translates its machine-readable status output into progress events.

use super::CommitError;
use crate::{
    clone::{Clock, MonotonicClock, Throughput},
    progress::CommitProgress,
};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use tempdir::TempDir;
use ubiquity_chroot::Command;

/// Environment variables set for, and removed from, every package manager run.
#[derive(Clone, Debug, PartialEq)]
pub struct AptEnvironment {
    pub set:    Vec<(String, String)>,
    pub remove: Vec<String>,
}

impl Default for AptEnvironment {
    fn default() -> Self {
        AptEnvironment {
            set:    vec![("DEBIAN_FRONTEND".into(), "noninteractive".into())],
            remove: vec!["DEBIAN_HAS_FRONTEND".into(), "DEBCONF_USE_CDEBCONF".into()],
        }
    }
}

impl AptEnvironment {
    pub fn apply(&self, command: &mut Command) {
        for variable in &self.remove {
            command.env_remove(variable);
        }

        for (key, value) in &self.set {
            command.env(key, value);
        }
    }
}

/// A line written by apt to its status file descriptor.
#[derive(Debug, PartialEq)]
pub enum StatusLine<'a> {
    Download { percent: f64, description: &'a str },
    Package { package: &'a str, percent: f64, description: &'a str },
    Error { package: &'a str, message: &'a str },
    Other(&'a str),
}

impl<'a> StatusLine<'a> {
    pub fn parse(line: &'a str) -> StatusLine<'a> {
        let mut fields = line.splitn(4, ':');
        let (kind, subject, percent, rest) =
            match (fields.next(), fields.next(), fields.next(), fields.next()) {
                (Some(kind), Some(subject), Some(percent), Some(rest)) => {
                    (kind, subject, percent, rest)
                }
                _ => return StatusLine::Other(line),
            };

        let percent = match percent.parse::<f64>() {
            Ok(percent) => percent,
            Err(_) => return StatusLine::Other(line),
        };

        match kind {
            "dlstatus" => StatusLine::Download { percent, description: rest },
            "pmstatus" => StatusLine::Package { package: subject, percent, description: rest },
            "pmerror" => StatusLine::Error { package: subject, message: rest },
            _ => StatusLine::Other(line),
        }
    }
}

/// Render the configuration which points apt at the target root.
pub fn apt_config(root: &Path) -> String {
    let root = root.display();
    format!(
        "Dir \"{root}/\";\n\
         APT::GPGV::TrustedKeyring \"{root}/etc/apt/trusted.gpg\";\n\
         Acquire::gpgv::Options:: \"--ignore-time-conflict\";\n\
         DPkg::Options:: \"--root={root}\";\n\
         #clear DPkg::Pre-Install-Pkgs;\n",
        root = root
    )
}

/// Runs `apt-get` against the package database of a target root.
#[derive(Clone, Debug)]
pub struct AptRunner {
    root:        PathBuf,
    program:     PathBuf,
    environment: AptEnvironment,
}

impl AptRunner {
    pub fn new(root: &Path) -> Self {
        AptRunner {
            root:        root.to_path_buf(),
            program:     PathBuf::from("apt-get"),
            environment: AptEnvironment::default(),
        }
    }

    pub fn program<P: Into<PathBuf>>(mut self, program: P) -> Self {
        self.program = program.into();
        self
    }

    pub fn environment(mut self, environment: AptEnvironment) -> Self {
        self.environment = environment;
        self
    }

    /// Refresh the package indices of the target.
    pub fn update(&self, progress: &mut CommitProgress) -> Result<bool, CommitError> {
        self.run(&["update"], progress)
    }

    /// Install and remove packages in a single transaction. Removals are
    /// purged when their flag is set.
    pub fn apply(
        &self,
        installs: &[String],
        removals: &[(String, bool)],
        progress: &mut CommitProgress,
    ) -> Result<bool, CommitError> {
        let mut args = vec!["install".to_owned(), "--yes".to_owned()];
        args.extend(installs.iter().cloned());
        args.extend(removals.iter().map(|&(ref package, purge)| {
            format!("{}{}", package, if purge { '_' } else { '-' })
        }));

        let args = args.iter().map(String::as_str).collect::<Vec<_>>();
        self.run(&args, progress)
    }

    fn run(&self, args: &[&str], progress: &mut CommitProgress) -> Result<bool, CommitError> {
        let config_dir = TempDir::new("ubiquity-apt")?;
        let config = config_dir.path().join("apt.conf");
        fs::write(&config, apt_config(&self.root))?;

        let mut command = cascade! {
            Command::new(&self.program);
            ..args(&["-o", "APT::Status-Fd=1"]);
            ..args(args);
            ..env("APT_CONFIG", &config);
        };
        self.environment.apply(&mut command);

        let description = format!("{} {}", self.program.display(), args.join(" "));
        let clock = MonotonicClock::default();
        let mut throughput = Throughput::new(clock.now());
        let mut downloading = false;
        let mut installing = false;

        let result = command.run_until(
            |line| match StatusLine::parse(line) {
                StatusLine::Download { percent, description } => {
                    if !downloading {
                        progress.fetch_start();
                        downloading = true;
                    }

                    debug!("fetching: {} ({:.1}%)", description, percent);
                    let eta = throughput.record(clock.now(), (percent * 1000.0) as u64, 100_000);
                    progress.fetch_pulse(percent, eta)
                }
                StatusLine::Package { package, percent, description } => {
                    if !installing {
                        progress.fetch_stop();
                        progress.install_start();
                        installing = true;
                    }

                    progress.status_change(package, percent, description);
                    true
                }
                StatusLine::Error { package, message } => {
                    progress.install_error(package, message);
                    true
                }
                StatusLine::Other(line) => {
                    info!("{}", line);
                    true
                }
            },
            |line| warn!("{}", line),
        );

        progress.finish();

        match result {
            Ok(true) => Ok(true),
            Ok(false) => {
                info!("{} was cancelled while fetching", description);
                Ok(false)
            }
            Err(why) if why.kind() == io::ErrorKind::NotFound => Err(CommitError::Io { why }),
            Err(why) => Err(CommitError::Subprocess { command: description, why }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{FetchProgress, InstallProgress, ProgressEvent, ProgressRecorder};
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn status_lines() {
        assert_eq!(
            StatusLine::parse("dlstatus:1:12.5:Retrieving file 1 of 8"),
            StatusLine::Download { percent: 12.5, description: "Retrieving file 1 of 8" }
        );
        assert_eq!(
            StatusLine::parse("pmstatus:libc6:40:Preparing to configure libc6: now"),
            StatusLine::Package {
                package:     "libc6",
                percent:     40.0,
                description: "Preparing to configure libc6: now",
            }
        );
        assert_eq!(
            StatusLine::parse("pmerror:casper:80:subprocess returned error exit status 1"),
            StatusLine::Error { package: "casper", message: "subprocess returned error exit status 1" }
        );
        assert_eq!(StatusLine::parse("Reading package lists..."), StatusLine::Other("Reading package lists..."));
        assert_eq!(StatusLine::parse("pmstatus:a:NaNish:x"), StatusLine::Other("pmstatus:a:NaNish:x"));
    }

    #[test]
    fn config_points_at_root() {
        let config = apt_config(Path::new("/target"));
        assert!(config.contains("Dir \"/target/\";"));
        assert!(config.contains("DPkg::Options:: \"--root=/target\";"));
        assert!(config.contains("#clear DPkg::Pre-Install-Pkgs;"));
    }

    fn script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("apt-get");
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn run_script(body: &str) -> (Result<bool, CommitError>, ProgressRecorder) {
        let dir = TempDir::new("apt").unwrap();
        let runner = AptRunner::new(dir.path()).program(script(dir.path(), body));
        let mut sink = ProgressRecorder::new();
        let result = {
            let mut progress = CommitProgress::new(
                &mut sink,
                FetchProgress::new("title", None, "fetch"),
                InstallProgress::new("title", "info", "error"),
            );
            runner.apply(&["a".into()], &[("b".into(), true)], &mut progress)
        };
        (result, sink)
    }

    #[test]
    fn successful_commit_reports_progress() {
        let (result, sink) = run_script(
            "test \"$DEBIAN_FRONTEND\" = noninteractive || exit 3\n\
             test -f \"$APT_CONFIG\" || exit 4\n\
             echo 'dlstatus:1:50:Retrieving'\n\
             echo 'pmstatus:a:25:Unpacking a'\n\
             echo 'pmerror:b:50:cannot purge'",
        );
        assert!(result.unwrap());
        assert_eq!(sink.sets(), vec![50, 25]);
        assert_eq!(sink.infos(), vec!["info", "error"]);
        assert_eq!(sink.events.iter().filter(|e| **e == ProgressEvent::Stop).count(), 2);
    }

    #[test]
    fn failure_while_fetching_is_an_error() {
        let (result, sink) = run_script("echo 'dlstatus:1:10:Retrieving'; exit 100");
        match result {
            Err(CommitError::Subprocess { .. }) => (),
            other => panic!("unexpected result: {:?}", other.map_err(|why| why.to_string())),
        }
        assert_eq!(sink.events.last(), Some(&ProgressEvent::Stop));
    }

    #[test]
    fn cancelling_the_fetch_stops_the_commit() {
        let dir = TempDir::new("apt").unwrap();
        let marker = dir.path().join("installed");
        let body = format!(
            "echo 'dlstatus:1:10:Retrieving'\nsleep 5\n\
             echo 'pmstatus:a:25:Unpacking a'\ntouch {}",
            marker.display()
        );
        let runner = AptRunner::new(dir.path()).program(script(dir.path(), &body));
        let mut sink = ProgressRecorder::new();
        sink.cancel = true;

        let result = {
            let mut progress = CommitProgress::new(
                &mut sink,
                FetchProgress::new("title", None, "fetch"),
                InstallProgress::new("title", "info", "error"),
            );
            runner.apply(&["a".into()], &[], &mut progress)
        };

        assert!(!result.unwrap());
        assert!(!marker.exists());
        assert_eq!(sink.sets(), vec![10]);
        assert!(sink.infos().is_empty());
        assert_eq!(sink.events.last(), Some(&ProgressEvent::Stop));
    }

    #[test]
    fn failure_during_install_is_an_error() {
        let (result, _) = run_script("echo 'pmstatus:a:10:Unpacking a'; exit 100");
        match result {
            Err(CommitError::Subprocess { .. }) => (),
            other => panic!("unexpected result: {:?}", other.map_err(|why| why.to_string())),
        }
    }

    #[test]
    fn missing_program_is_an_error() {
        let dir = TempDir::new("apt").unwrap();
        let runner = AptRunner::new(dir.path()).program(dir.path().join("missing"));
        let mut sink = ProgressRecorder::new();
        let mut progress = CommitProgress::new(
            &mut sink,
            FetchProgress::new("title", None, "fetch"),
            InstallProgress::new("title", "info", "error"),
        );
        match runner.update(&mut progress) {
            Err(CommitError::Io { .. }) => (),
            other => panic!("unexpected result: {:?}", other.map_err(|why| why.to_string())),
        }
    }
}
