use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use once_cell::sync::Lazy;
use std::fmt;
use std::time::{Duration, Instant};

pub const BAR_WIDTH: usize = 30;
/// ETAs beyond this are noise from a stalled or just-started transfer.
pub const ETA_CEILING: Duration = Duration::from_secs(3600);

const KB: u64 = 1024;
const MB: u64 = 1024 * 1024;

const LINE_STYLE: &str = "{prefix:>9.bold} {msg}";

static LINE_TEMPLATE: Lazy<Option<ProgressStyle>> =
    Lazy::new(|| ProgressStyle::with_template(LINE_STYLE).ok());

pub fn format_size(bytes: u64) -> String {
    if bytes < KB {
        format!("{bytes} B")
    } else if bytes < MB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    }
}

pub fn format_speed(bytes_per_sec: f64) -> String {
    format!("{}/s", format_size(bytes_per_sec.max(0.0) as u64))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eta {
    Unknown,
    Remaining(Duration),
}

impl Eta {
    pub fn estimate(total_bytes: u64, bytes_so_far: u64, speed: f64) -> Eta {
        if total_bytes == 0 || speed.is_nan() || speed <= 0.0 {
            return Eta::Unknown;
        }
        let secs = total_bytes.saturating_sub(bytes_so_far) as f64 / speed;
        if !secs.is_finite() || secs > ETA_CEILING.as_secs_f64() {
            return Eta::Unknown;
        }
        Eta::Remaining(Duration::from_secs_f64(secs))
    }
}

impl fmt::Display for Eta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Eta::Unknown => write!(f, "--:--"),
            Eta::Remaining(d) => {
                let s = d.as_secs();
                write!(f, "{:02}:{:02}", s / 60, s % 60)
            }
        }
    }
}

/// Per-transfer state; lives from the first byte to the last.
#[derive(Debug, Clone)]
pub struct DownloadProgress {
    pub bytes_transferred: u64,
    /// Zero when the size is unknown.
    pub total_bytes: u64,
    pub started_at: Instant,
    pub last_sample_at: Instant,
    pub last_sample_bytes: u64,
    /// Bytes per second over the most recent sample window.
    pub speed: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderState {
    pub bytes: u64,
    pub total: u64,
    /// `None` when the total is unknown.
    pub percent: Option<u8>,
    pub filled: usize,
    pub width: usize,
    pub speed: f64,
    pub eta: Eta,
    /// True when this sample closed a window and recomputed the speed.
    pub resampled: bool,
    /// Set only on the state returned by [`ProgressTracker::finalize`].
    pub elapsed: Option<Duration>,
}

impl RenderState {
    pub fn bar(&self) -> String {
        let filled = self.filled.min(self.width);
        format!("[{}{}]", "#".repeat(filled), "-".repeat(self.width - filled))
    }
}

impl fmt::Display for RenderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pct = match self.percent {
            Some(p) => format!("{p:>3}%"),
            None => " --%".to_string(),
        };
        let size = if self.total > 0 && self.elapsed.is_none() {
            format!("{} / {}", format_size(self.bytes), format_size(self.total))
        } else {
            format_size(self.bytes)
        };
        match self.elapsed {
            Some(elapsed) => write!(
                f,
                "{} {pct} {size}  {} avg  in {:.1}s",
                self.bar(),
                format_speed(self.speed),
                elapsed.as_secs_f64()
            ),
            None => write!(
                f,
                "{} {pct} {size}  {}  ETA {}",
                self.bar(),
                format_speed(self.speed),
                self.eta
            ),
        }
    }
}

pub struct ProgressTracker {
    state: DownloadProgress,
    interval: Duration,
    width: usize,
}

impl ProgressTracker {
    pub fn new(total_bytes: u64, started_at: Instant, interval: Duration) -> Self {
        ProgressTracker {
            state: DownloadProgress {
                bytes_transferred: 0,
                total_bytes,
                started_at,
                last_sample_at: started_at,
                last_sample_bytes: 0,
                speed: 0.0,
            },
            interval,
            width: BAR_WIDTH,
        }
    }

    pub fn with_width(mut self, width: usize) -> Self {
        self.width = width;
        self
    }

    pub fn progress(&self) -> &DownloadProgress {
        &self.state
    }

    /// Records `bytes_so_far`; the speed is only recomputed once more than the
    /// sampling interval has passed since the previous window closed.
    pub fn sample(&mut self, bytes_so_far: u64, now: Instant) -> RenderState {
        let bytes = bytes_so_far.max(self.state.bytes_transferred);
        self.state.bytes_transferred = bytes;

        let window = now.saturating_duration_since(self.state.last_sample_at);
        let resampled = window > self.interval;
        if resampled {
            let delta = bytes - self.state.last_sample_bytes;
            self.state.speed = delta as f64 / window.as_secs_f64();
            self.state.last_sample_at = now;
            self.state.last_sample_bytes = bytes;
            log::trace!("sample window {:?}: {delta} bytes", window);
        }

        let eta = Eta::estimate(self.state.total_bytes, bytes, self.state.speed);
        self.render(bytes, self.state.total_bytes, self.state.speed, eta, resampled, None)
    }

    /// Final state after completion, using the average rate over the whole
    /// transfer rather than the last window.
    pub fn finalize(&mut self, total_bytes: u64, elapsed: Duration) -> RenderState {
        let secs = elapsed.as_secs_f64();
        let average = if secs > 0.0 {
            total_bytes as f64 / secs
        } else {
            0.0
        };
        self.state.bytes_transferred = total_bytes;
        self.state.total_bytes = total_bytes;
        self.state.speed = average;
        self.render(
            total_bytes,
            total_bytes,
            average,
            Eta::Remaining(Duration::ZERO),
            true,
            Some(elapsed),
        )
    }

    fn render(
        &self,
        bytes: u64,
        total: u64,
        speed: f64,
        eta: Eta,
        resampled: bool,
        elapsed: Option<Duration>,
    ) -> RenderState {
        let (percent, filled) = if total > 0 {
            let ratio = (bytes as f64 / total as f64).min(1.0);
            (
                Some((ratio * 100.0).floor() as u8),
                (ratio * self.width as f64).floor() as usize,
            )
        } else {
            (None, 0)
        };
        RenderState {
            bytes,
            total,
            percent,
            filled,
            width: self.width,
            speed,
            eta,
            resampled,
            elapsed,
        }
    }
}

/// Hooks a transfer reports into. Every method defaults to a no-op.
pub trait DownloadObserver {
    fn started(&mut self, _total_bytes: u64) {}
    fn chunk(&mut self, _bytes_so_far: u64) {}
    fn finished(&mut self, _bytes: u64, _elapsed: Duration) {}
    fn failed(&mut self) {}
}

pub struct Silent;

impl DownloadObserver for Silent {}

/// Draws a [`ProgressTracker`] line on stderr through indicatif.
pub struct TerminalProgress {
    bar: ProgressBar,
    tracker: Option<ProgressTracker>,
    interval: Duration,
}

impl TerminalProgress {
    pub fn new(label: &str, interval: Duration) -> Self {
        Self::with_draw_target(label, interval, ProgressDrawTarget::stderr())
    }

    pub fn with_draw_target(label: &str, interval: Duration, target: ProgressDrawTarget) -> Self {
        let bar = ProgressBar::with_draw_target(None, target);
        if let Some(style) = LINE_TEMPLATE.as_ref() {
            bar.set_style(style.clone());
        }
        bar.set_prefix(label.to_string());
        TerminalProgress {
            bar,
            tracker: None,
            interval,
        }
    }
}

impl DownloadObserver for TerminalProgress {
    fn started(&mut self, total_bytes: u64) {
        let mut tracker = ProgressTracker::new(total_bytes, Instant::now(), self.interval);
        let first = tracker.sample(0, Instant::now());
        self.bar.set_message(first.to_string());
        self.tracker = Some(tracker);
    }

    fn chunk(&mut self, bytes_so_far: u64) {
        if let Some(tracker) = self.tracker.as_mut() {
            let state = tracker.sample(bytes_so_far, Instant::now());
            if state.resampled {
                self.bar.set_message(state.to_string());
            }
        }
    }

    fn finished(&mut self, bytes: u64, elapsed: Duration) {
        let mut tracker = self
            .tracker
            .take()
            .unwrap_or_else(|| ProgressTracker::new(bytes, Instant::now(), self.interval));
        let state = tracker.finalize(bytes, elapsed);
        self.bar.finish_with_message(state.to_string());
    }

    fn failed(&mut self) {
        self.bar.abandon_with_message("failed");
    }
}
