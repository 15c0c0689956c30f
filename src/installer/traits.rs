use super::{Phase, PhaseError};
use crate::{errors::IoContext, progress::ProgressSink};
use envfile::EnvFile;
use std::{collections::BTreeMap, io, path::Path};
use ubiquity_chroot::Command;

/// Answers to the questions asked before the installation began.
pub trait ConfigSource {
    /// The answer to `question`, or `None` if it was never answered.
    fn get(&self, question: &str) -> Option<String>;
}

impl ConfigSource for BTreeMap<String, String> {
    fn get(&self, question: &str) -> Option<String> { BTreeMap::get(self, question).cloned() }
}

impl<'a, C: ConfigSource + ?Sized> ConfigSource for &'a C {
    fn get(&self, question: &str) -> Option<String> { (**self).get(question) }
}

/// Preseeded answers, read from a file of `question=value` lines.
pub struct PreseedAnswers(EnvFile);

impl PreseedAnswers {
    pub fn load(path: &Path) -> io::Result<Self> {
        EnvFile::new(path)
            .map(PreseedAnswers)
            .with_context(|why| format!("error reading answers at {}: {}", path.display(), why))
    }
}

impl ConfigSource for PreseedAnswers {
    fn get(&self, question: &str) -> Option<String> { self.0.get(question).map(String::from) }
}

/// Runs the external helpers which apply configuration to the target.
pub trait HelperRunner {
    /// Run a helper's command line to completion, with additional
    /// environment variables, failing if it exits unsuccessfully.
    fn run(&mut self, command: &[String], envs: &[(&str, &str)]) -> io::Result<()>;
}

/// Runs helpers as child processes of the installer.
#[derive(Debug, Default)]
pub struct ProcessRunner;

impl HelperRunner for ProcessRunner {
    fn run(&mut self, command: &[String], envs: &[(&str, &str)]) -> io::Result<()> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty helper command"))?;

        let mut helper = Command::new(program);
        helper.args(args);
        for &(key, value) in envs {
            helper.env(key, value);
        }

        helper.run()
    }
}

/// Performs the work of each installation phase.
pub trait Steps {
    fn execute(&mut self, phase: Phase, sink: &mut dyn ProgressSink) -> Result<(), PhaseError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempdir::TempDir;

    #[test]
    fn preseeded_answers() {
        let dir = TempDir::new("answers").unwrap();
        let path = dir.path().join("preseed");
        fs::write(&path, "netcfg/get_hostname=ubuntu-desktop\npkgsel/language-packs=de, fr\n")
            .unwrap();

        let answers = PreseedAnswers::load(&path).unwrap();
        assert_eq!(answers.get("netcfg/get_hostname"), Some("ubuntu-desktop".into()));
        assert_eq!(answers.get("pkgsel/language-packs"), Some("de, fr".into()));
        assert_eq!(answers.get("debian-installer/keymap"), None);
    }

    #[test]
    fn process_runner_passes_environment() {
        let dir = TempDir::new("runner").unwrap();
        let marker = dir.path().join("keymap");
        let script = format!("printf %s \"$KEYMAP\" > {}", marker.display());
        let command = vec!["sh".to_owned(), "-c".to_owned(), script];

        ProcessRunner.run(&command, &[("KEYMAP", "de-latin1")]).unwrap();
        assert_eq!(fs::read_to_string(&marker).unwrap(), "de-latin1");

        let failing = vec!["sh".to_owned(), "-c".to_owned(), "exit 1".to_owned()];
        assert!(ProcessRunner.run(&failing, &[]).is_err());
        assert!(ProcessRunner.run(&[], &[]).is_err());
    }
}
