//! The work done by each phase of an installation onto a mounted target.

mod bootloader;
mod configure;
mod hooks;
mod logs;
mod mount;
mod network;
mod packages;
mod update;

pub use self::{
    bootloader::*, configure::*, hooks::*, logs::*, mount::*, network::*, packages::*, update::*,
};

use super::{Config, ConfigSource, HelperRunner, Phase, PhaseError, Steps};
use crate::{
    clone::FileTreeCloner,
    kernels::KernelPruner,
    packages::{AptRunner, DpkgCache, PackageCache},
    progress::ProgressSink,
};
use std::{io, path::Path};

/// Open the package database of the system at `root`, committing through
/// apt with the configured environment.
pub fn package_cache(root: &Path, config: &Config) -> io::Result<PackageCache<DpkgCache>> {
    let apt = AptRunner::new(root).environment(config.apt_environment.clone());
    DpkgCache::open(root, apt).map(PackageCache::new)
}

/// Installs the live system onto the target described by a `Config`.
pub struct TargetSteps<A: ConfigSource, R: HelperRunner> {
    config:  Config,
    answers: A,
    runner:  R,
    network: NetworkHost,
    source:  Option<SourceMount>,
}

impl<A: ConfigSource, R: HelperRunner> TargetSteps<A, R> {
    pub fn new(config: Config, answers: A, runner: R) -> Self {
        TargetSteps { config, answers, runner, network: NetworkHost::default(), source: None }
    }

    pub fn config(&self) -> &Config { &self.config }

    fn mount_source(&mut self, sink: &mut dyn ProgressSink) -> Result<(), PhaseError> {
        if !self.config.mounts_source() {
            info!("copying from the running live system at {}", self.config.source.display());
            return Ok(());
        }

        self.source = Some(SourceMount::mount(&self.config.source, &self.config.source_images)?);

        if self.config.check_for_updates() {
            let mut cache = package_cache(Path::new("/"), &self.config)?;
            check_for_updated_version(&mut cache, sink)?;
        }

        Ok(())
    }

    fn unmount_source(&mut self) -> Result<(), PhaseError> {
        match self.source.take() {
            Some(source) => source.unmount().map_err(PhaseError::from),
            None => Ok(()),
        }
    }

    fn link_in_boot(&self) -> bool {
        self.config.link_in_boot
            || self
                .answers
                .get("base-installer/kernel/linux/link_in_boot")
                .map_or(false, |value| value == "true")
    }

    fn remove_unusable_kernels(&mut self, sink: &mut dyn ProgressSink) -> Result<(), PhaseError> {
        let pruner = KernelPruner {
            target:         &self.config.target,
            kernel_version: &self.config.kernel_version,
            remove_list:    &self.config.remove_kernels,
            link_in_boot:   self.link_in_boot(),
            classifier:     &self.config.helpers.check_kernels,
        };

        let mut cache = package_cache(&self.config.target, &self.config)?;
        pruner.prune(&mut self.runner, &mut cache, sink).map_err(PhaseError::from)
    }

    fn remove_extras(&mut self, sink: &mut dyn ProgressSink) -> Result<(), PhaseError> {
        let config = &self.config;
        let extras =
            removable_extras(&config.manifest, &config.manifest_desktop, &config.apt_installed)?;
        if extras.is_empty() {
            return Ok(());
        }

        let mut cache = package_cache(&config.target, config)?;
        remove_extras(extras, &mut cache, sink)
    }
}

impl<A: ConfigSource, R: HelperRunner> Steps for TargetSteps<A, R> {
    fn execute(&mut self, phase: Phase, sink: &mut dyn ProgressSink) -> Result<(), PhaseError> {
        let config = &self.config;
        let helpers = &config.helpers;

        match phase {
            Phase::MountSource => self.mount_source(sink),
            Phase::CopyFiles => FileTreeCloner::new()
                .clone_tree(&config.source, &config.target, sink)
                .map_err(PhaseError::from),
            Phase::UnmountSource => self.unmount_source(),
            Phase::TargetHooks => run_target_hooks(&config.hook_dir, sink),
            Phase::Locales => run_helper(&mut self.runner, &helpers.locales, &[]),
            Phase::Network => configure_network(&self.network, &config.target, &self.answers),
            Phase::Apt => {
                write_apt_overrides(&config.target)?;
                run_helper(&mut self.runner, &helpers.apt_setup, &[])
            }
            Phase::LanguagePacks => install_language_packs(
                &self.answers,
                &config.apt_installed,
                || package_cache(&config.target, config),
                sink,
            ),
            Phase::Timezone => configure_timezone(&mut self.runner, &helpers.timezone),
            Phase::Keyboard => {
                configure_keyboard(&mut self.runner, &helpers.keyboard, &self.answers)
            }
            Phase::User => run_helper(&mut self.runner, &helpers.user_setup, &[]),
            Phase::Hardware => configure_hardware(&config.target, &config.kernel_version),
            Phase::Kernels => self.remove_unusable_kernels(sink),
            Phase::Bootloader => {
                configure_bootloader(&mut self.runner, &config.target, &helpers.bootloaders)
            }
            Phase::RemoveExtras => self.remove_extras(sink),
            Phase::CopyLogs => copy_logs(&config.syslog, &config.target),
            Phase::Cleanup => cleanup(&config.target),
        }
    }
}
