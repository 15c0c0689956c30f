use pbr::ProgressBar;
use std::{io, sync::atomic::Ordering};
use ubiquity::{LogSink, ProgressSink, KILL_SWITCH};

const RESOLUTION: u64 = 1000;

/// A progress bar which has been started, and the share of the overall
/// progress that it occupies.
struct Bar {
    min:   u32,
    max:   u32,
    value: u32,
    lower: f64,
    upper: f64,
}

impl Bar {
    /// Map a value of this bar onto the overall progress, from 0 to 1.
    fn overall(&self, value: u32) -> f64 {
        let span = f64::from(self.max.saturating_sub(self.min).max(1));
        let fraction = f64::from(value.saturating_sub(self.min).min(self.max - self.min)) / span;
        self.lower + (self.upper - self.lower) * fraction
    }
}

/// Renders nested progress bars as a single terminal progress bar.
pub struct TerminalSink {
    bar:     ProgressBar<io::Stdout>,
    stack:   Vec<Bar>,
    pending: Option<(u32, u32)>,
    log:     LogSink,
}

impl TerminalSink {
    pub fn new() -> Self {
        let mut bar = ProgressBar::new(RESOLUTION);
        bar.show_speed = false;
        bar.show_time_left = false;
        TerminalSink { bar, stack: Vec::new(), pending: None, log: LogSink::new() }
    }

    pub fn finish(&mut self) { self.bar.finish_println(""); }

    fn render(&mut self) {
        if let Some(top) = self.stack.last() {
            self.bar.set((top.overall(top.value) * RESOLUTION as f64) as u64);
        }
    }
}

impl ProgressSink for TerminalSink {
    fn start(&mut self, min: u32, max: u32, title: &str) {
        let (lower, upper) = match (self.stack.last(), self.pending.take()) {
            (Some(parent), Some((start, end))) => (parent.overall(start), parent.overall(end)),
            (Some(parent), None) => {
                let position = parent.overall(parent.value);
                (position, position)
            }
            (None, _) => (0.0, 1.0),
        };

        self.stack.push(Bar { min, max: max.max(min), value: min, lower, upper });
        self.log.start(min, max, title);
        self.render();
    }

    fn set(&mut self, value: u32) {
        if let Some(top) = self.stack.last_mut() {
            top.value = value;
        }
        self.render();
    }

    fn region(&mut self, start: u32, end: u32) {
        self.pending = Some((start, end));
        self.log.region(start, end);
    }

    fn info(&mut self, key: &str) {
        self.log.info(key);
        let message = format!("{} ", self.log.render(key));
        self.bar.message(&message);
    }

    fn step(&mut self, n: u32) {
        if let Some(top) = self.stack.last_mut() {
            top.value = top.value.saturating_add(n);
        }
        self.render();
    }

    fn stop(&mut self) {
        self.stack.pop();
        self.pending = None;
        self.log.stop();
    }

    fn substitute(&mut self, key: &str, var: &str, value: &str) {
        self.log.substitute(key, var, value);
    }

    fn cancelled(&self) -> bool { KILL_SWITCH.load(Ordering::SeqCst) }
}
