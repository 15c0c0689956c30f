use super::{InstallError, Phase, Steps};
use crate::{progress::ProgressSink, KILL_SWITCH};
use std::sync::atomic::Ordering;

pub struct InstallerState<'a, S: Steps> {
    pub steps: &'a mut S,
    pub sink:  &'a mut dyn ProgressSink,
}

impl<'a, S: Steps> InstallerState<'a, S> {
    pub fn new(steps: &'a mut S, sink: &'a mut dyn ProgressSink) -> Self { Self { steps, sink } }

    /// Run a single phase, after checking for cancellation and positioning
    /// the overall progress bar for it.
    pub fn apply(&mut self, phase: Phase) -> Result<(), InstallError> {
        unsafe {
            libc::sync();
        }

        if KILL_SWITCH.load(Ordering::SeqCst) || self.sink.cancelled() {
            info!("cancelled before the {} phase", phase);
            return Err(InstallError::Cancelled { phase });
        }

        let prelude = phase.prelude();
        if let Some(value) = prelude.set {
            self.sink.set(value);
        }

        if let Some((start, end)) = prelude.region {
            self.sink.region(start, end);
        }

        if let Some(key) = prelude.info {
            self.sink.info(key);
        }

        info!("starting {} phase", phase);
        match self.steps.execute(phase, self.sink) {
            Ok(()) => Ok(()),
            Err(why) if phase.is_best_effort() => {
                warn!("{} error, continuing: {}", phase, why);
                Ok(())
            }
            Err(why) => {
                error!("{} error: {}", phase, why);
                Err(InstallError::Phase { phase, why })
            }
        }
    }
}
