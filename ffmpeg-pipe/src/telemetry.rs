//! Throughput, conversion cost and CPU load of a capture session.

use std::fmt;
use std::time::{Duration, Instant};

use crate::cpu::CpuSampler;

pub const CPU_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);
pub const FPS_WINDOW: Duration = Duration::from_secs(1);

/// Frame rate over consecutive windows of at least [`FPS_WINDOW`].
#[derive(Debug, Clone)]
pub struct FpsWindow {
    started: Instant,
    frames: u64,
    current: f64,
}

impl FpsWindow {
    pub fn new(now: Instant) -> Self {
        Self {
            started: now,
            frames: 0,
            current: 0.0,
        }
    }

    pub fn record(&mut self) {
        self.frames += 1;
    }

    /// Closes the window once it is old enough and returns the latest rate.
    pub fn tick(&mut self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.started);
        if elapsed >= FPS_WINDOW {
            self.current = self.frames as f64 / elapsed.as_secs_f64();
            self.frames = 0;
            self.started = now;
        }
        self.current
    }

    pub fn current(&self) -> f64 {
        self.current
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub frames_processed: u64,
    pub skipped_frames: u64,
    pub conversion_total: Duration,
    pub conversion_count: u64,
    pub cpu_total: f64,
    pub cpu_samples: u64,
}

impl SessionStats {
    pub fn average_conversion(&self) -> Duration {
        if self.conversion_count == 0 {
            return Duration::ZERO;
        }
        let nanos = self.conversion_total.as_nanos() / self.conversion_count as u128;
        Duration::from_nanos(nanos as u64)
    }

    pub fn average_cpu(&self) -> f64 {
        if self.cpu_samples == 0 {
            return 0.0;
        }
        self.cpu_total / self.cpu_samples as f64
    }
}

/// One refresh of the live progress line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub frames: u64,
    pub cpu_usage: f64,
    pub fps: f64,
    pub avg_conversion: Duration,
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Frames processed: {} CPU Usage: {:.1}% FPS: {:.1} Avg conversion time: {:.3}ms",
            self.frames,
            self.cpu_usage,
            self.fps,
            self.avg_conversion.as_secs_f64() * 1000.0
        )
    }
}

pub struct Telemetry {
    stats: SessionStats,
    fps: FpsWindow,
    last_cpu_check: Option<Instant>,
    cpu_error_logged: bool,
}

impl Telemetry {
    pub fn new(now: Instant) -> Self {
        Self {
            stats: SessionStats::default(),
            fps: FpsWindow::new(now),
            last_cpu_check: None,
            cpu_error_logged: false,
        }
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn record_conversion(&mut self, elapsed: Duration) {
        self.stats.conversion_total += elapsed;
        self.stats.conversion_count += 1;
    }

    pub fn record_frame(&mut self) {
        self.stats.frames_processed += 1;
        self.fps.record();
    }

    pub fn record_skipped(&mut self) {
        self.stats.skipped_frames += 1;
    }

    pub fn tick_fps(&mut self, now: Instant) -> f64 {
        self.fps.tick(now)
    }

    /// Samples the CPU when the last sample is at least
    /// [`CPU_SAMPLE_INTERVAL`] old and returns the progress to print.
    pub fn maybe_sample_cpu(
        &mut self,
        now: Instant,
        sampler: &mut dyn CpuSampler,
    ) -> Option<Progress> {
        if let Some(last) = self.last_cpu_check {
            if now.saturating_duration_since(last) < CPU_SAMPLE_INTERVAL {
                return None;
            }
        }
        self.last_cpu_check = Some(now);

        let cpu_usage = match sampler.sample() {
            Ok(usage) => {
                self.stats.cpu_total += usage;
                self.stats.cpu_samples += 1;
                usage
            }
            Err(e) => {
                if !self.cpu_error_logged {
                    log::warn!("cpu sampling unavailable: {:#}", e);
                    self.cpu_error_logged = true;
                }
                0.0
            }
        };

        Some(Progress {
            frames: self.stats.frames_processed,
            cpu_usage,
            fps: self.fps.current(),
            avg_conversion: self.stats.average_conversion(),
        })
    }

    pub fn summary(&self, elapsed: Duration) -> TelemetrySummary {
        let seconds = elapsed.as_secs_f64();
        let (average_fps, conversion_overhead) = if seconds > 0.0 {
            (
                self.stats.frames_processed as f64 / seconds,
                self.stats.conversion_total.as_secs_f64() / seconds * 100.0,
            )
        } else {
            (0.0, 0.0)
        };

        TelemetrySummary {
            total_frames: self.stats.frames_processed,
            skipped_frames: self.stats.skipped_frames,
            elapsed,
            average_cpu: self.stats.average_cpu(),
            average_fps,
            average_conversion: self.stats.average_conversion(),
            total_conversion: self.stats.conversion_total,
            conversion_overhead,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySummary {
    pub total_frames: u64,
    pub skipped_frames: u64,
    pub elapsed: Duration,
    pub average_cpu: f64,
    pub average_fps: f64,
    pub average_conversion: Duration,
    pub total_conversion: Duration,
    /// Conversion time as a percentage of session wall time.
    pub conversion_overhead: f64,
}

impl fmt::Display for TelemetrySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total frames processed: {}", self.total_frames)?;
        writeln!(f, "Frames skipped: {}", self.skipped_frames)?;
        writeln!(f, "Average CPU usage: {:.1}%", self.average_cpu)?;
        writeln!(f, "Average FPS: {:.1}", self.average_fps)?;
        writeln!(
            f,
            "Average conversion time: {:.3}ms",
            self.average_conversion.as_secs_f64() * 1000.0
        )?;
        writeln!(
            f,
            "Total conversion time: {:.3}ms",
            self.total_conversion.as_secs_f64() * 1000.0
        )?;
        write!(f, "Conversion overhead: {:.1}%", self.conversion_overhead)
    }
}
