//! The installation pipeline: a fixed sequence of phases, each assigned a
//! share of the overall progress bar, which stops at the first failure.

mod conf;
mod state;
mod traits;

pub mod steps;

pub use self::{conf::*, traits::*};

use self::state::InstallerState;
use crate::{
    clone::CloneError, kernels::KernelError, packages::CommitError, progress::ProgressSink,
};
use std::{fmt, io};

pub const TITLE: &str = "ubiquity/install/title";

/// Installation phase
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Phase {
    MountSource,
    CopyFiles,
    UnmountSource,
    TargetHooks,
    Locales,
    Network,
    Apt,
    LanguagePacks,
    Timezone,
    Keyboard,
    User,
    Hardware,
    Kernels,
    Bootloader,
    RemoveExtras,
    CopyLogs,
    Cleanup,
}

/// Progress events emitted before a phase begins.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Prelude {
    pub set:    Option<u32>,
    pub region: Option<(u32, u32)>,
    pub info:   Option<&'static str>,
}

const fn prelude(set: Option<u32>, region: Option<(u32, u32)>, info: Option<&'static str>) -> Prelude {
    Prelude { set, region, info }
}

impl Phase {
    /// Every phase, in the order that they are run.
    pub const ALL: [Phase; 17] = [
        Phase::MountSource,
        Phase::CopyFiles,
        Phase::UnmountSource,
        Phase::TargetHooks,
        Phase::Locales,
        Phase::Network,
        Phase::Apt,
        Phase::LanguagePacks,
        Phase::Timezone,
        Phase::Keyboard,
        Phase::User,
        Phase::Hardware,
        Phase::Kernels,
        Phase::Bootloader,
        Phase::RemoveExtras,
        Phase::CopyLogs,
        Phase::Cleanup,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Phase::MountSource => "mount source",
            Phase::CopyFiles => "copy files",
            Phase::UnmountSource => "unmount source",
            Phase::TargetHooks => "target config hooks",
            Phase::Locales => "configure locales",
            Phase::Network => "configure network",
            Phase::Apt => "configure apt",
            Phase::LanguagePacks => "install language packs",
            Phase::Timezone => "configure timezone",
            Phase::Keyboard => "configure keyboard",
            Phase::User => "configure user",
            Phase::Hardware => "configure hardware",
            Phase::Kernels => "remove unusable kernels",
            Phase::Bootloader => "configure bootloader",
            Phase::RemoveExtras => "remove extras",
            Phase::CopyLogs => "copy logs",
            Phase::Cleanup => "cleanup",
        }
    }

    /// The position of the overall progress bar when the phase begins, the
    /// range of it which the phase's own progress bar occupies, and the
    /// message which describes it.
    pub fn prelude(self) -> Prelude {
        match self {
            Phase::MountSource => prelude(None, None, Some("ubiquity/install/mounting_source")),
            Phase::CopyFiles => prelude(Some(1), Some((1, 78)), None),
            Phase::UnmountSource => prelude(Some(78), None, Some("ubiquity/install/cleanup")),
            Phase::TargetHooks => prelude(Some(79), Some((79, 80)), None),
            Phase::Locales => prelude(Some(80), Some((80, 81)), Some("ubiquity/install/locales")),
            Phase::Network => prelude(Some(81), Some((81, 82)), Some("ubiquity/install/network")),
            Phase::Apt => prelude(Some(82), Some((82, 83)), Some("ubiquity/install/apt")),
            Phase::LanguagePacks => prelude(Some(83), Some((83, 87)), None),
            Phase::Timezone => prelude(Some(87), Some((87, 88)), Some("ubiquity/install/timezone")),
            Phase::Keyboard => prelude(Some(88), Some((88, 90)), Some("ubiquity/install/keyboard")),
            Phase::User => prelude(Some(90), Some((90, 91)), Some("ubiquity/install/user")),
            Phase::Hardware => prelude(Some(91), Some((91, 95)), Some("ubiquity/install/hardware")),
            Phase::Kernels => prelude(Some(95), Some((95, 96)), None),
            Phase::Bootloader => {
                prelude(Some(96), Some((96, 97)), Some("ubiquity/install/bootloader"))
            }
            Phase::RemoveExtras => prelude(Some(97), Some((97, 99)), Some("ubiquity/install/removing")),
            Phase::CopyLogs => prelude(Some(99), None, Some("ubiquity/install/log_files")),
            Phase::Cleanup => prelude(None, None, None),
        }
    }

    /// Failures of best-effort phases are logged, and the installation continues.
    pub fn is_best_effort(self) -> bool { self == Phase::LanguagePacks }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { f.write_str(self.name()) }
}

#[derive(Debug, Fail)]
pub enum PhaseError {
    #[fail(display = "{}", why)]
    Io { why: io::Error },
    #[fail(display = "failed to copy the file system: {}", why)]
    Clone { why: CloneError },
    #[fail(display = "package manager error: {}", why)]
    Commit { why: CommitError },
    #[fail(display = "{}", why)]
    Kernels { why: KernelError },
    #[fail(display = "helper {} failed: {}", helper, why)]
    Helper { helper: String, why: io::Error },
    #[fail(display = "no file system image was found to mount as the source")]
    NoSourceImage,
    #[fail(display = "no bootloader installer is available")]
    NoBootloader,
    #[fail(display = "package manager did not complete the {}", what)]
    Incomplete { what: &'static str },
}

impl From<io::Error> for PhaseError {
    fn from(why: io::Error) -> PhaseError { PhaseError::Io { why } }
}

impl From<CloneError> for PhaseError {
    fn from(why: CloneError) -> PhaseError { PhaseError::Clone { why } }
}

impl From<CommitError> for PhaseError {
    fn from(why: CommitError) -> PhaseError { PhaseError::Commit { why } }
}

impl From<KernelError> for PhaseError {
    fn from(why: KernelError) -> PhaseError { PhaseError::Kernels { why } }
}

/// Installer error
#[derive(Debug, Fail)]
pub enum InstallError {
    #[fail(display = "{} phase failed: {}", phase, why)]
    Phase { phase: Phase, why: PhaseError },
    #[fail(display = "installation was cancelled before the {} phase", phase)]
    Cancelled { phase: Phase },
}

impl InstallError {
    /// The key of the message which the front end shows for this error.
    pub fn message_key(&self) -> &'static str {
        match *self {
            InstallError::Cancelled { .. } => "ubiquity/install/cancelled",
            InstallError::Phase { why: PhaseError::Commit { .. }, .. }
            | InstallError::Phase { why: PhaseError::Incomplete { .. }, .. }
            | InstallError::Phase { why: PhaseError::Kernels { .. }, .. } => {
                "ubiquity/install/apt_error"
            }
            InstallError::Phase { phase: Phase::CopyFiles, .. } => "ubiquity/install/copying_error",
            InstallError::Phase { phase: Phase::Bootloader, .. } => {
                "ubiquity/install/bootloader_failed"
            }
            InstallError::Phase { .. } => "ubiquity/install/failed",
        }
    }

    pub fn phase(&self) -> Phase {
        match *self {
            InstallError::Phase { phase, .. } | InstallError::Cancelled { phase } => phase,
        }
    }
}

/// Runs every phase of an installation in order.
pub struct InstallDriver<S: Steps> {
    steps: S,
}

impl<S: Steps> InstallDriver<S> {
    pub fn new(steps: S) -> Self { InstallDriver { steps } }

    pub fn steps(&self) -> &S { &self.steps }

    /// Run the installation, emitting a final `stop` whether it succeeds or not.
    ///
    /// Completed phases are not rolled back when a later phase fails.
    pub fn run(&mut self, sink: &mut dyn ProgressSink) -> Result<(), InstallError> {
        sink.start(0, 100, TITLE);

        {
            let mut state = InstallerState::new(&mut self.steps, &mut *sink);
            for &phase in Phase::ALL.iter() {
                if let Err(why) = state.apply(phase) {
                    state.sink.stop();
                    return Err(why);
                }
            }
        }

        sink.set(100);
        sink.stop();
        info!("installation complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{ProgressEvent, ProgressRecorder};

    #[derive(Default)]
    struct ScriptedSteps {
        fail:     Vec<Phase>,
        executed: Vec<Phase>,
    }

    impl Steps for ScriptedSteps {
        fn execute(&mut self, phase: Phase, sink: &mut dyn ProgressSink) -> Result<(), PhaseError> {
            self.executed.push(phase);
            if self.fail.contains(&phase) {
                sink.start(0, 10, TITLE);
                return Err(PhaseError::Helper {
                    helper: phase.name().into(),
                    why:    io::Error::new(io::ErrorKind::Other, "exited with status 1"),
                });
            }
            Ok(())
        }
    }

    #[test]
    fn successful_run_reproduces_progress_layout() {
        let mut driver = InstallDriver::new(ScriptedSteps::default());
        let mut sink = ProgressRecorder::new();
        driver.run(&mut sink).unwrap();

        assert_eq!(driver.steps().executed, Phase::ALL.to_vec());
        assert_eq!(
            sink.sets(),
            vec![1, 78, 79, 80, 81, 82, 83, 87, 88, 90, 91, 95, 96, 97, 99, 100]
        );
        assert_eq!(sink.infos(), vec![
            "ubiquity/install/mounting_source",
            "ubiquity/install/cleanup",
            "ubiquity/install/locales",
            "ubiquity/install/network",
            "ubiquity/install/apt",
            "ubiquity/install/timezone",
            "ubiquity/install/keyboard",
            "ubiquity/install/user",
            "ubiquity/install/hardware",
            "ubiquity/install/bootloader",
            "ubiquity/install/removing",
            "ubiquity/install/log_files",
        ]);
        assert_eq!(&sink.events[..3], &[
            ProgressEvent::Start { min: 0, max: 100, title: TITLE.into() },
            ProgressEvent::Info("ubiquity/install/mounting_source".into()),
            ProgressEvent::Set(1),
        ]);
        assert_eq!(sink.events[3], ProgressEvent::Region { start: 1, end: 78 });
        assert_eq!(sink.events.last(), Some(&ProgressEvent::Stop));
    }

    #[test]
    fn network_failure_stops_before_apt() {
        let mut driver =
            InstallDriver::new(ScriptedSteps { fail: vec![Phase::Network], ..Default::default() });
        let mut sink = ProgressRecorder::new();
        let error = driver.run(&mut sink).unwrap_err();

        assert_eq!(error.phase(), Phase::Network);
        assert_eq!(error.message_key(), "ubiquity/install/failed");
        assert!(!driver.steps().executed.contains(&Phase::Apt));
        assert_eq!(driver.steps().executed.last(), Some(&Phase::Network));
        assert!(sink.events.contains(&ProgressEvent::Region { start: 81, end: 82 }));
        assert_eq!(sink.events.last(), Some(&ProgressEvent::Stop));
    }

    #[test]
    fn language_pack_failure_is_ignored() {
        let mut driver = InstallDriver::new(ScriptedSteps {
            fail: vec![Phase::LanguagePacks],
            ..Default::default()
        });
        let mut sink = ProgressRecorder::new();
        driver.run(&mut sink).unwrap();

        let executed = &driver.steps().executed;
        let langpacks = executed.iter().position(|&p| p == Phase::LanguagePacks).unwrap();
        assert_eq!(executed[langpacks + 1], Phase::Timezone);
        assert_eq!(executed.len(), Phase::ALL.len());
    }

    #[test]
    fn cancellation_is_observed_between_phases() {
        let mut driver = InstallDriver::new(ScriptedSteps::default());
        let mut sink = ProgressRecorder::new();
        sink.cancel = true;

        let error = driver.run(&mut sink).unwrap_err();
        assert_eq!(error.message_key(), "ubiquity/install/cancelled");
        assert!(driver.steps().executed.is_empty());
        assert_eq!(sink.events.last(), Some(&ProgressEvent::Stop));
    }

    #[test]
    fn message_keys() {
        let copy = InstallError::Phase {
            phase: Phase::CopyFiles,
            why:   PhaseError::Io { why: io::Error::new(io::ErrorKind::Other, "disk full") },
        };
        assert_eq!(copy.message_key(), "ubiquity/install/copying_error");

        let commit = InstallError::Phase {
            phase: Phase::RemoveExtras,
            why:   PhaseError::Incomplete { what: "removal of extra packages" },
        };
        assert_eq!(commit.message_key(), "ubiquity/install/apt_error");
    }
}
