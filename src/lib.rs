//! A crate for installing Ubuntu from a live system onto a prepared target

#[macro_use]
extern crate cascade;
extern crate failure;
#[macro_use]
extern crate failure_derive;
#[macro_use]
extern crate log;

pub mod clone;
mod errors;
pub mod installer;
pub mod kernels;
mod logging;
pub mod packages;
pub mod progress;

pub use self::{
    clone::{CloneError, FileTreeCloner},
    errors::IoContext,
    installer::{
        Config, ConfigSource, HelperRunner, InstallDriver, InstallError, Phase, PhaseError,
        PreseedAnswers, ProcessRunner, Steps,
    },
    kernels::{KernelError, KernelPruner},
    logging::log,
    packages::{DependencyCache, DpkgCache, PackageCache},
    progress::{LogSink, ProgressSink},
};

use std::sync::atomic::AtomicBool;

/// Set to cancel the installation before its next phase begins.
pub static KILL_SWITCH: AtomicBool = AtomicBool::new(false);
