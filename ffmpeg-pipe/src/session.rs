//! Bounded capture session: read, decode, convert and optionally record.
//!
//! A session moves through `Starting -> Streaming -> Draining -> Flushing ->
//! Closed` exactly once. It stops streaming when the duration ceiling is hit,
//! the input ends, or too many consecutive packets fail to decode.

use std::fmt;
use std::io::Write;
use std::time::{Duration, Instant};

use crate::{
    convert::{ConversionPlan, ConversionStrategy, FrameConverter, TargetFormat},
    cpu::{CpuSampler, ProcStatSampler},
    decoder::{CodecDescriptor, DecoderInstance, DecoderKind},
    input::{AvInput, PacketSource, TransportOptions},
    packet::ReadOutcome,
    recorder::Recorder,
    telemetry::{Telemetry, TelemetrySummary},
};

pub const MAX_SESSION_DURATION: Duration = Duration::from_secs(10);
pub const MAX_CONSECUTIVE_ERRORS: u32 = 10;
pub const DEFAULT_OUTPUT: &str = "output.mp4";
pub const DEFAULT_RESIZE: (u32, u32) = (800, 600);

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub url: String,
    /// Container to record into; `None` disables recording.
    pub output: Option<String>,
    /// Target frame size; `None` keeps the decoded size.
    pub resize: Option<(u32, u32)>,
    pub target_format: TargetFormat,
    pub accelerate_conversion: bool,
    pub max_duration: Duration,
    pub transport: TransportOptions,
    pub show_progress: bool,
}

impl SessionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            output: Some(DEFAULT_OUTPUT.to_string()),
            resize: Some(DEFAULT_RESIZE),
            target_format: TargetFormat::default(),
            accelerate_conversion: false,
            max_duration: MAX_SESSION_DURATION,
            transport: TransportOptions::default(),
            show_progress: true,
        }
    }

    pub fn with_output(mut self, output: Option<String>) -> Self {
        self.output = output;
        self
    }

    pub fn with_resize(mut self, resize: Option<(u32, u32)>) -> Self {
        self.resize = resize;
        self
    }

    pub fn with_target_format(mut self, target_format: TargetFormat) -> Self {
        self.target_format = target_format;
        self
    }

    pub fn with_accelerated_conversion(mut self, accelerate: bool) -> Self {
        self.accelerate_conversion = accelerate;
        self
    }

    pub fn with_max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration = max_duration;
        self
    }

    pub fn with_transport(mut self, transport: TransportOptions) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }
}

/// Consecutive-failure counter; any success resets it.
#[derive(Debug, Clone)]
pub struct ErrorBudget {
    limit: u32,
    consecutive: u32,
}

impl ErrorBudget {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            consecutive: 0,
        }
    }

    /// Counts one failure and returns true once the budget is exhausted.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive += 1;
        self.consecutive >= self.limit
    }

    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}

impl Default for ErrorBudget {
    fn default() -> Self {
        Self::new(MAX_CONSECUTIVE_ERRORS)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    DurationElapsed,
    EndOfStream,
    ErrorBudgetExhausted,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::DurationElapsed => write!(f, "maximum duration reached"),
            StopReason::EndOfStream => write!(f, "end of stream"),
            StopReason::ErrorBudgetExhausted => write!(f, "too many consecutive errors"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Streaming,
    Draining(StopReason),
    Flushing,
    Closed,
}

pub struct Session {
    // Fields drop in declaration order: latest acquired first.
    decoded: ffmpeg_next::frame::Video,
    recorder: Option<Recorder>,
    converter: FrameConverter,
    decoder: DecoderInstance,
    input: Box<dyn PacketSource>,
    cpu: Box<dyn CpuSampler>,
    codec: CodecDescriptor,
    config: SessionConfig,
    budget: ErrorBudget,
    state: SessionState,
}

impl Session {
    /// Connects, selects a decoder, resolves the conversion plan and opens
    /// the recorder. Any failure here is fatal and carries a `PipeError`.
    pub fn open(config: SessionConfig) -> anyhow::Result<Self> {
        log::info!("connecting to {}", config.url);
        let input = AvInput::open(&config.url, &config.transport)?;
        let stream = input.video_stream().clone();
        log::info!(
            "video stream {}: codec {:?}, {} fps, time base {}",
            stream.index(),
            stream.codec_id(),
            stream.rate(),
            stream.time_base()
        );

        let decoder = DecoderInstance::select(&stream)?;
        let mut codec = CodecDescriptor::resolve(&stream, &decoder)?;
        log::info!(
            "decoder {} ({:?}): {}x{} {:?}",
            decoder.name(),
            decoder.kind(),
            codec.width,
            codec.height,
            codec.pixel_format
        );

        let plan = ConversionPlan::resolve(
            &codec,
            config.target_format,
            config.resize,
            config.accelerate_conversion,
        );
        log::info!(
            "conversion {:?}: {:?} -> {:?}",
            plan.strategy,
            plan.source,
            plan.target
        );
        let converter = FrameConverter::new(plan)?;

        let recorder = match config.output.as_deref() {
            Some(path) => {
                let recorder = Recorder::open(path, &codec, &plan)?;
                codec = codec.with_encoder_format(recorder.encoder_format());
                Some(recorder)
            }
            None => {
                log::info!("recording disabled");
                None
            }
        };

        Ok(Self {
            decoded: ffmpeg_next::frame::Video::empty(),
            recorder,
            converter,
            decoder,
            input: Box::new(input),
            cpu: Box::new(ProcStatSampler::new()),
            codec,
            config,
            budget: ErrorBudget::default(),
            state: SessionState::Starting,
        })
    }

    pub fn with_cpu_sampler(mut self, sampler: impl CpuSampler + 'static) -> Self {
        self.cpu = Box::new(sampler);
        self
    }

    /// Replaces the connected input; packets come from `source` from now on.
    pub fn with_packet_source(mut self, source: impl PacketSource + 'static) -> Self {
        self.input = Box::new(source);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn codec(&self) -> &CodecDescriptor {
        &self.codec
    }

    pub fn plan(&self) -> &ConversionPlan {
        self.converter.plan()
    }

    fn transition(&mut self, next: SessionState) {
        log::info!("session {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Drives the session to `Closed`. Stopping is never an error; failures
    /// after setup are logged and reflected in the summary.
    pub fn run(mut self) -> SessionSummary {
        let started = Instant::now();
        let mut telemetry = Telemetry::new(started);

        self.transition(SessionState::Streaming);
        let reason = self.stream(started, &mut telemetry);

        self.transition(SessionState::Draining(reason));
        if reason == StopReason::EndOfStream {
            self.drain_decoder(&mut telemetry);
        }
        if self.config.show_progress {
            println!();
        }

        self.transition(SessionState::Flushing);
        let mut packets_written = None;
        if let Some(recorder) = self.recorder.as_mut() {
            if let Err(e) = recorder.finish() {
                log::error!("failed to finalize {}: {:#}", recorder.path(), e);
            }
            packets_written = Some(recorder.packets_written());
        }

        self.transition(SessionState::Closed);
        let plan = *self.converter.plan();
        SessionSummary {
            stop_reason: reason,
            decoder_kind: self.decoder.kind(),
            decoder_name: self.decoder.name().to_string(),
            strategy: plan.strategy,
            resize: plan.resize,
            target_format: self.config.target_format,
            output: self.config.output.clone(),
            packets_written,
            encoder_format: self.codec.encoder_format,
            telemetry: telemetry.summary(started.elapsed()),
        }
    }

    fn stream(&mut self, started: Instant, telemetry: &mut Telemetry) -> StopReason {
        loop {
            let now = Instant::now();
            if now.saturating_duration_since(started) >= self.config.max_duration {
                log::info!(
                    "reached maximum duration ({} seconds)",
                    self.config.max_duration.as_secs_f64()
                );
                return StopReason::DurationElapsed;
            }
            telemetry.tick_fps(now);

            let packet = match self.input.read_packet() {
                Ok(ReadOutcome::Packet(packet)) => packet,
                Ok(ReadOutcome::EndOfStream) => {
                    log::info!("end of stream");
                    return StopReason::EndOfStream;
                }
                Err(e) => {
                    log::warn!(
                        "read error: {} ({} consecutive)",
                        e,
                        self.budget.consecutive() + 1
                    );
                    if self.budget.record_failure() {
                        return StopReason::ErrorBudgetExhausted;
                    }
                    continue;
                }
            };
            if packet.stream_index() != self.input.video_stream_index() {
                continue;
            }

            if let Err(e) = self.decoder.send_packet(&packet) {
                log::warn!(
                    "error sending packet to decoder: {} ({} consecutive)",
                    e,
                    self.budget.consecutive() + 1
                );
                if self.budget.record_failure() {
                    log::error!("too many consecutive errors, stopping");
                    return StopReason::ErrorBudgetExhausted;
                }
                continue;
            }
            self.budget.record_success();
            self.receive_frames(telemetry);
        }
    }

    fn drain_decoder(&mut self, telemetry: &mut Telemetry) {
        if let Err(e) = self.decoder.send_eof() {
            log::warn!("decoder eof error: {}", e);
            return;
        }
        self.receive_frames(telemetry);
    }

    fn receive_frames(&mut self, telemetry: &mut Telemetry) {
        loop {
            match self.decoder.receive_frame(&mut self.decoded) {
                Ok(true) => self.process_frame(telemetry),
                Ok(false) => break,
                Err(e) => {
                    log::warn!("error receiving frame: {:#}", e);
                    break;
                }
            }
        }
    }

    fn process_frame(&mut self, telemetry: &mut Telemetry) {
        let converted = match self.converter.convert(&self.decoded) {
            Ok(converted) => converted,
            Err(e) => {
                log::warn!("conversion failed, skipping frame: {:#}", e);
                telemetry.record_skipped();
                return;
            }
        };
        telemetry.record_conversion(converted.elapsed);

        if let Some(recorder) = self.recorder.as_mut() {
            let index = telemetry.stats().frames_processed as i64;
            if let Err(e) = recorder.push(converted.frame, index) {
                log::warn!("encode error: {:#}", e);
            }
        }
        telemetry.record_frame();

        if let Some(progress) = telemetry.maybe_sample_cpu(Instant::now(), self.cpu.as_mut()) {
            if self.config.show_progress {
                print!("\r{}", progress);
                let _ = std::io::stdout().flush();
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub stop_reason: StopReason,
    pub decoder_kind: DecoderKind,
    pub decoder_name: String,
    pub strategy: ConversionStrategy,
    pub resize: bool,
    pub target_format: TargetFormat,
    pub output: Option<String>,
    pub packets_written: Option<u64>,
    pub encoder_format: Option<ffmpeg_next::format::Pixel>,
    pub telemetry: TelemetrySummary,
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Processing completed ({}):", self.stop_reason)?;
        writeln!(f, "{}", self.telemetry)?;
        writeln!(
            f,
            "Mode: {}, {}, Color format: {}",
            if self.resize { "With resize" } else { "No resize" },
            if self.output.is_some() { "With record" } else { "No record" },
            self.target_format
        )?;
        write!(
            f,
            "Decoder: {} ({:?}), conversion: {:?}",
            self.decoder_name, self.decoder_kind, self.strategy
        )?;
        if let (Some(path), Some(packets)) = (&self.output, self.packets_written) {
            write!(f, "\nOutput: {} ({} packets", path, packets)?;
            if let Some(format) = self.encoder_format {
                write!(f, ", {:?}", format)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;
