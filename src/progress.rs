//! Progress reporting towards the front end.
//!
//! The installer core never renders anything itself. It drives a
//! [`ProgressSink`] with a small vocabulary of events, where titles and info
//! messages are template keys that the front end translates, optionally after
//! substituting variables into them.

use std::{collections::BTreeMap, time::Duration};

/// Receives progress events from the installation pipeline.
pub trait ProgressSink {
    /// Begin a progress bar which spans `min..=max`, titled by a template key.
    fn start(&mut self, min: u32, max: u32, title: &str);

    /// Move the current bar to `value`.
    fn set(&mut self, value: u32);

    /// Map the next nested bar onto `start..=end` of the current bar.
    fn region(&mut self, start: u32, end: u32);

    /// Display the template `key` as the current activity.
    fn info(&mut self, key: &str);

    /// Advance the current bar by `n`.
    fn step(&mut self, n: u32);

    /// Close the current bar.
    fn stop(&mut self);

    /// Substitute `value` for `${var}` in the template `key`.
    fn substitute(&mut self, key: &str, var: &str, value: &str);

    /// Whether the front end has asked for the install to be cancelled.
    fn cancelled(&self) -> bool { false }
}

impl<'a, S: ProgressSink + ?Sized> ProgressSink for &'a mut S {
    fn start(&mut self, min: u32, max: u32, title: &str) { (**self).start(min, max, title) }

    fn set(&mut self, value: u32) { (**self).set(value) }

    fn region(&mut self, start: u32, end: u32) { (**self).region(start, end) }

    fn info(&mut self, key: &str) { (**self).info(key) }

    fn step(&mut self, n: u32) { (**self).step(n) }

    fn stop(&mut self) { (**self).stop() }

    fn substitute(&mut self, key: &str, var: &str, value: &str) {
        (**self).substitute(key, var, value)
    }

    fn cancelled(&self) -> bool { (**self).cancelled() }
}

/// A single event emitted to a `ProgressSink`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProgressEvent {
    Start { min: u32, max: u32, title: String },
    Set(u32),
    Region { start: u32, end: u32 },
    Info(String),
    Step(u32),
    Stop,
    Substitute { key: String, var: String, value: String },
}

/// Records every event it receives, in order.
#[derive(Debug, Default)]
pub struct ProgressRecorder {
    pub events: Vec<ProgressEvent>,
    pub cancel: bool,
}

impl ProgressRecorder {
    pub fn new() -> Self { Self::default() }

    /// Values of every `Set` event, in order.
    pub fn sets(&self) -> Vec<u32> {
        self.events
            .iter()
            .filter_map(|event| match *event {
                ProgressEvent::Set(value) => Some(value),
                _ => None,
            })
            .collect()
    }

    /// Keys of every `Info` event, in order.
    pub fn infos(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|event| match *event {
                ProgressEvent::Info(ref key) => Some(key.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl ProgressSink for ProgressRecorder {
    fn start(&mut self, min: u32, max: u32, title: &str) {
        self.events.push(ProgressEvent::Start { min, max, title: title.into() });
    }

    fn set(&mut self, value: u32) { self.events.push(ProgressEvent::Set(value)); }

    fn region(&mut self, start: u32, end: u32) {
        self.events.push(ProgressEvent::Region { start, end });
    }

    fn info(&mut self, key: &str) { self.events.push(ProgressEvent::Info(key.into())); }

    fn step(&mut self, n: u32) { self.events.push(ProgressEvent::Step(n)); }

    fn stop(&mut self) { self.events.push(ProgressEvent::Stop); }

    fn substitute(&mut self, key: &str, var: &str, value: &str) {
        self.events.push(ProgressEvent::Substitute {
            key:   key.into(),
            var:   var.into(),
            value: value.into(),
        });
    }

    fn cancelled(&self) -> bool { self.cancel }
}

/// Writes progress events to the log, rendering info keys with any
/// substitutions that were made for them.
#[derive(Debug, Default)]
pub struct LogSink {
    substitutions: BTreeMap<String, BTreeMap<String, String>>,
}

impl LogSink {
    pub fn new() -> Self { Self::default() }

    /// The key followed by its current substitutions, such as
    /// `ubiquity/install/copying_time [TIME=3:04]`.
    pub fn render(&self, key: &str) -> String {
        match self.substitutions.get(key) {
            Some(vars) if !vars.is_empty() => {
                let vars = vars.iter().map(|(var, value)| format!("{}={}", var, value));
                format!("{} [{}]", key, itertools::join(vars, ", "))
            }
            _ => key.to_owned(),
        }
    }
}

impl ProgressSink for LogSink {
    fn start(&mut self, min: u32, max: u32, title: &str) {
        info!("progress: {} ({}..{})", title, min, max);
    }

    fn set(&mut self, value: u32) { debug!("progress: {}", value); }

    fn region(&mut self, start: u32, end: u32) { debug!("progress region: {}..{}", start, end); }

    fn info(&mut self, key: &str) { info!("progress: {}", self.render(key)); }

    fn step(&mut self, n: u32) { debug!("progress step: {}", n); }

    fn stop(&mut self) { debug!("progress stopped"); }

    fn substitute(&mut self, key: &str, var: &str, value: &str) {
        self.substitutions.entry(key.into()).or_default().insert(var.into(), value.into());
    }
}

/// Format a duration as minutes and zero-padded seconds, ie: `12:05`.
pub fn format_time(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{}:{:02}", secs / 60, secs % 60)
}

/// Reports the package manager's archive downloads.
#[derive(Debug)]
pub struct FetchProgress {
    title:         String,
    info_starting: Option<String>,
    info:          String,
    started:       bool,
}

impl FetchProgress {
    pub fn new(title: &str, info_starting: Option<&str>, info: &str) -> Self {
        FetchProgress {
            title:         title.into(),
            info_starting: info_starting.map(String::from),
            info:          info.into(),
            started:       false,
        }
    }

    pub fn start(&mut self, sink: &mut dyn ProgressSink) {
        sink.start(0, 100, &self.title);
        if let Some(ref key) = self.info_starting {
            sink.info(key);
        }
        self.started = true;
    }

    /// Report the download percentage and estimated time remaining.
    ///
    /// Returns `false` if the front end asked to cancel the download.
    pub fn pulse(
        &mut self,
        sink: &mut dyn ProgressSink,
        percent: f64,
        eta: Option<Duration>,
    ) -> bool {
        sink.set(percent as u32);
        if let Some(eta) = eta.filter(|eta| *eta > Duration::from_secs(0)) {
            sink.substitute(&self.info, "TIME", &format_time(eta));
            sink.info(&self.info);
        }

        !sink.cancelled()
    }

    pub fn stop(&mut self, sink: &mut dyn ProgressSink) {
        if self.started {
            sink.stop();
            self.started = false;
        }
    }
}

/// Reports the package manager's unpacking and configuration of packages.
#[derive(Debug)]
pub struct InstallProgress {
    title:          String,
    info:           String,
    error_template: String,
    started:        bool,
}

impl InstallProgress {
    pub fn new(title: &str, info: &str, error_template: &str) -> Self {
        InstallProgress {
            title:          title.into(),
            info:           info.into(),
            error_template: error_template.into(),
            started:        false,
        }
    }

    pub fn start_update(&mut self, sink: &mut dyn ProgressSink) {
        sink.start(0, 100, &self.title);
        self.started = true;
    }

    pub fn status_change(
        &mut self,
        sink: &mut dyn ProgressSink,
        package: &str,
        percent: f64,
        status: &str,
    ) {
        debug!("{}: {} ({:.1}%)", package, status, percent);
        sink.set(percent as u32);
        sink.substitute(&self.info, "DESCRIPTION", status);
        sink.info(&self.info);
    }

    pub fn error(&mut self, sink: &mut dyn ProgressSink, package: &str, message: &str) {
        error!("package manager error on {}: {}", package, message);
        sink.substitute(&self.error_template, "PACKAGE", package);
        sink.substitute(&self.error_template, "MESSAGE", message);
        sink.info(&self.error_template);
    }

    pub fn finish_update(&mut self, sink: &mut dyn ProgressSink) {
        if self.started {
            sink.stop();
            self.started = false;
        }
    }
}

/// Everything a package commit reports through.
pub struct CommitProgress<'a> {
    pub sink:    &'a mut dyn ProgressSink,
    pub fetch:   FetchProgress,
    pub install: InstallProgress,
}

impl<'a> CommitProgress<'a> {
    pub fn new(
        sink: &'a mut dyn ProgressSink,
        fetch: FetchProgress,
        install: InstallProgress,
    ) -> Self {
        CommitProgress { sink, fetch, install }
    }

    pub fn fetch_start(&mut self) { self.fetch.start(self.sink) }

    pub fn fetch_pulse(&mut self, percent: f64, eta: Option<Duration>) -> bool {
        self.fetch.pulse(self.sink, percent, eta)
    }

    pub fn fetch_stop(&mut self) { self.fetch.stop(self.sink) }

    pub fn install_start(&mut self) { self.install.start_update(self.sink) }

    pub fn status_change(&mut self, package: &str, percent: f64, status: &str) {
        self.install.status_change(self.sink, package, percent, status)
    }

    pub fn install_error(&mut self, package: &str, message: &str) {
        self.install.error(self.sink, package, message)
    }

    pub fn install_finish(&mut self) { self.install.finish_update(self.sink) }

    /// Close whichever bars are still open.
    pub fn finish(&mut self) {
        self.fetch_stop();
        self.install_finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_format() {
        assert_eq!(format_time(Duration::from_secs(5)), "0:05");
        assert_eq!(format_time(Duration::from_secs(725)), "12:05");
    }

    #[test]
    fn fetch_pulse_substitutes_time() {
        let mut sink = ProgressRecorder::new();
        let mut fetch = FetchProgress::new(
            "ubiquity/langpacks/title",
            None,
            "ubiquity/langpacks/packages",
        );
        fetch.start(&mut sink);
        assert!(fetch.pulse(&mut sink, 42.7, Some(Duration::from_secs(65))));
        assert!(fetch.pulse(&mut sink, 50.0, None));
        fetch.stop(&mut sink);
        fetch.stop(&mut sink);

        assert_eq!(sink.events, vec![
            ProgressEvent::Start { min: 0, max: 100, title: "ubiquity/langpacks/title".into() },
            ProgressEvent::Set(42),
            ProgressEvent::Substitute {
                key:   "ubiquity/langpacks/packages".into(),
                var:   "TIME".into(),
                value: "1:05".into(),
            },
            ProgressEvent::Info("ubiquity/langpacks/packages".into()),
            ProgressEvent::Set(50),
            ProgressEvent::Stop,
        ]);
    }

    #[test]
    fn fetch_pulse_reports_cancellation() {
        let mut sink = ProgressRecorder::new();
        sink.cancel = true;
        let mut fetch = FetchProgress::new("title", Some("starting"), "info");
        fetch.start(&mut sink);
        assert!(!fetch.pulse(&mut sink, 1.0, None));
        assert_eq!(sink.infos(), vec!["starting"]);
    }

    #[test]
    fn install_error_fills_template() {
        let mut sink = ProgressRecorder::new();
        let mut install = InstallProgress::new(
            "ubiquity/install/title",
            "ubiquity/install/apt_info",
            "ubiquity/install/apt_error_remove",
        );
        install.error(&mut sink, "casper", "subprocess returned 1");
        install.finish_update(&mut sink);

        assert_eq!(sink.infos(), vec!["ubiquity/install/apt_error_remove"]);
        assert!(!sink.events.contains(&ProgressEvent::Stop));
    }

    #[test]
    fn log_sink_renders_substitutions() {
        let mut sink = LogSink::new();
        assert_eq!(sink.render("ubiquity/install/copying_time"), "ubiquity/install/copying_time");
        sink.substitute("ubiquity/install/copying_time", "TIME", "3:04");
        assert_eq!(
            sink.render("ubiquity/install/copying_time"),
            "ubiquity/install/copying_time [TIME=3:04]"
        );
    }
}
