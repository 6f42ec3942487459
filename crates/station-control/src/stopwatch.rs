use std::time::{Duration, Instant};

/// Mission stopwatch. Elapsed time accumulates across start/stop cycles and
/// can only be cleared while stopped.
#[derive(Debug, Clone, Default)]
pub struct Stopwatch {
    accumulated: Duration,
    started: Option<Instant>,
}

impl Stopwatch {
    pub fn start(&mut self) {
        self.start_at(Instant::now());
    }

    pub fn stop(&mut self) {
        self.stop_at(Instant::now());
    }

    pub fn start_at(&mut self, now: Instant) {
        if self.started.is_none() {
            self.started = Some(now);
        }
    }

    pub fn stop_at(&mut self, now: Instant) {
        if let Some(t0) = self.started.take() {
            self.accumulated += now.saturating_duration_since(t0);
        }
    }

    /// Returns false (and keeps the time) while running.
    pub fn reset(&mut self) -> bool {
        if self.is_running() {
            return false;
        }
        self.accumulated = Duration::ZERO;
        true
    }

    pub fn is_running(&self) -> bool {
        self.started.is_some()
    }

    pub fn elapsed_at(&self, now: Instant) -> Duration {
        let live = self.started.map(|t0| now.saturating_duration_since(t0)).unwrap_or_default();
        self.accumulated + live
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed_at(Instant::now())
    }

    pub fn display(&self) -> String {
        format_dhms(self.elapsed())
    }
}

/// `DD:HH:MM:SS`
pub fn format_dhms(d: Duration) -> String {
    let s = d.as_secs();
    format!("{:02}:{:02}:{:02}:{:02}", s / 86_400, (s / 3600) % 24, (s / 60) % 60, s % 60)
}
