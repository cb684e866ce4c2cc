use super::*;
use crate::error::PipeError;
use ffmpeg_next::codec::Id;
use ffmpeg_next::format::Pixel;

const FIXTURE_WIDTH: u32 = 320;
const FIXTURE_HEIGHT: u32 = 240;
const FIXTURE_FRAMES: i64 = 60;

struct ZeroSampler;

impl CpuSampler for ZeroSampler {
    fn sample(&mut self) -> anyhow::Result<f64> {
        Ok(0.0)
    }
}

fn temp_path(name: &str) -> String {
    std::env::temp_dir()
        .join(format!("ffmpeg-pipe-{}-{}", std::process::id(), name))
        .to_string_lossy()
        .into_owned()
}

/// Writes a short MPEG-4 Part 2 clip through the crate's own recorder.
/// Returns None when this FFmpeg build has no mpeg4 encoder.
fn synthesize_clip(name: &str) -> Option<String> {
    crate::init().unwrap();
    if ffmpeg_next::encoder::find(Id::MPEG4).is_none() {
        eprintln!("mpeg4 encoder not available, skipping");
        return None;
    }

    let path = temp_path(name);
    let codec =
        CodecDescriptor::new("mpeg4", Id::MPEG4, FIXTURE_WIDTH, FIXTURE_HEIGHT, Pixel::YUV420P)
            .unwrap();
    let plan = ConversionPlan::resolve(&codec, TargetFormat::Native, None, false);
    let mut recorder = Recorder::open(&path, &codec, &plan).unwrap();

    let mut frame = ffmpeg_next::frame::Video::new(Pixel::YUV420P, FIXTURE_WIDTH, FIXTURE_HEIGHT);
    for index in 0..FIXTURE_FRAMES {
        for plane in 0..3 {
            let shade = (index as usize * 4 + plane * 60) % 256;
            frame.data_mut(plane).fill(shade as u8);
        }
        recorder.push(&mut frame, index).unwrap();
    }
    recorder.finish().unwrap();
    Some(path)
}

/// Fails `failures_per_packet` reads before every packet of `inner`, then
/// reports end of stream once `inner` is exhausted or absent.
struct FlakySource {
    inner: Option<AvInput>,
    failures_per_packet: u32,
    failed: u32,
}

impl FlakySource {
    fn new(inner: Option<AvInput>, failures_per_packet: u32) -> Self {
        Self {
            inner,
            failures_per_packet,
            failed: 0,
        }
    }
}

impl PacketSource for FlakySource {
    fn video_stream_index(&self) -> usize {
        self.inner
            .as_ref()
            .map(|input| input.video_stream_index())
            .unwrap_or(0)
    }

    fn read_packet(&mut self) -> Result<ReadOutcome, ffmpeg_next::Error> {
        if self.failed < self.failures_per_packet {
            self.failed += 1;
            return Err(ffmpeg_next::Error::InvalidData);
        }
        self.failed = 0;
        match self.inner.as_mut() {
            Some(input) => input.read_packet(),
            None => Ok(ReadOutcome::EndOfStream),
        }
    }
}

fn open_session(config: SessionConfig) -> Session {
    Session::open(config.with_progress(false))
        .unwrap()
        .with_cpu_sampler(ZeroSampler)
}

#[test]
fn test_error_budget_tolerates_nine_failures() {
    let mut budget = ErrorBudget::default();
    for _ in 0..9 {
        assert!(!budget.record_failure());
    }
    assert_eq!(budget.consecutive(), 9);
    assert!(budget.record_failure());
}

#[test]
fn test_error_budget_resets_on_success() {
    let mut budget = ErrorBudget::new(3);
    assert!(!budget.record_failure());
    assert!(!budget.record_failure());
    budget.record_success();
    assert_eq!(budget.consecutive(), 0);
    assert!(!budget.record_failure());
    assert!(!budget.record_failure());
    assert!(budget.record_failure());
}

#[test]
fn test_config_defaults() {
    let config = SessionConfig::new("rtsp://camera/stream");
    assert_eq!(config.output.as_deref(), Some(DEFAULT_OUTPUT));
    assert_eq!(config.resize, Some((800, 600)));
    assert_eq!(config.target_format, TargetFormat::Native);
    assert_eq!(config.max_duration, Duration::from_secs(10));
    assert!(!config.accelerate_conversion);
}

#[test]
fn test_open_missing_input_is_connect_error() {
    crate::init().unwrap();
    let config = SessionConfig::new(temp_path("does-not-exist.mp4")).with_output(None);
    let err = match Session::open(config) {
        Ok(_) => panic!("opening a missing file must fail"),
        Err(err) => err,
    };
    let pipe_error = err.downcast_ref::<PipeError>();
    assert!(
        matches!(pipe_error, Some(PipeError::Connect { .. })),
        "unexpected error: {:?}",
        err
    );
    assert_eq!(pipe_error.map(|e| e.reason()), Some("connect"));
}

#[test]
fn test_software_decode_resize_and_record() {
    let Some(input) = synthesize_clip("record-in.mp4") else {
        return;
    };
    let output = temp_path("record-out.mp4");

    let session = open_session(SessionConfig::new(&input).with_output(Some(output.clone())));
    assert_eq!(session.state(), SessionState::Starting);
    assert_eq!(session.plan().strategy, ConversionStrategy::SoftwareScale);
    assert_eq!(session.codec().pixel_format, Pixel::YUV420P);
    assert_eq!(session.codec().encoder_format, Some(Pixel::YUV420P));
    let summary = session.run();

    assert_eq!(summary.stop_reason, StopReason::EndOfStream);
    assert_eq!(summary.decoder_kind, DecoderKind::Software);
    assert_eq!(summary.telemetry.total_frames, FIXTURE_FRAMES as u64);
    assert_eq!(summary.telemetry.skipped_frames, 0);
    assert!(summary.packets_written.unwrap_or(0) > 0);
    assert_eq!(summary.encoder_format, Some(Pixel::YUV420P));
    assert!(summary.to_string().contains("YUV420P"));

    let recorded = AvInput::open(&output, &TransportOptions::default()).unwrap();
    assert_eq!(recorded.streams().len(), 1);
    assert_eq!(recorded.video_stream().width(), 800);
    assert_eq!(recorded.video_stream().height(), 600);

    let _ = std::fs::remove_file(&input);
    let _ = std::fs::remove_file(&output);
}

#[test]
fn test_no_record_no_resize_is_identity() {
    let Some(input) = synthesize_clip("identity-in.mp4") else {
        return;
    };

    let session = open_session(
        SessionConfig::new(&input)
            .with_output(None)
            .with_resize(None),
    );
    assert_eq!(session.plan().strategy, ConversionStrategy::IdentityCopy);
    assert_eq!(session.codec().width, FIXTURE_WIDTH);
    assert_eq!(session.codec().encoder_format, None);
    let summary = session.run();

    assert_eq!(summary.stop_reason, StopReason::EndOfStream);
    assert_eq!(summary.output, None);
    assert_eq!(summary.packets_written, None);
    assert_eq!(summary.telemetry.total_frames, FIXTURE_FRAMES as u64);
    assert!(!summary.to_string().contains("Output:"));

    let _ = std::fs::remove_file(&input);
}

#[test]
fn test_nv12_without_resize_interleaves() {
    let Some(input) = synthesize_clip("nv12-in.mp4") else {
        return;
    };

    let session = open_session(
        SessionConfig::new(&input)
            .with_output(None)
            .with_resize(None)
            .with_target_format(TargetFormat::SemiPlanar),
    );
    assert_eq!(session.plan().strategy, ConversionStrategy::ChromaInterleave);
    let summary = session.run();
    assert_eq!(summary.telemetry.total_frames, FIXTURE_FRAMES as u64);
    assert_eq!(summary.telemetry.skipped_frames, 0);

    let _ = std::fs::remove_file(&input);
}

#[test]
fn test_zero_duration_processes_nothing() {
    let Some(input) = synthesize_clip("deadline-in.mp4") else {
        return;
    };

    let summary = open_session(
        SessionConfig::new(&input)
            .with_output(None)
            .with_max_duration(Duration::ZERO),
    )
    .run();

    assert_eq!(summary.stop_reason, StopReason::DurationElapsed);
    assert_eq!(summary.telemetry.total_frames, 0);

    let _ = std::fs::remove_file(&input);
}

#[test]
fn test_consecutive_read_errors_stop_session() {
    let Some(input) = synthesize_clip("budget-in.mp4") else {
        return;
    };

    let summary = open_session(SessionConfig::new(&input).with_output(None))
        .with_packet_source(FlakySource::new(None, MAX_CONSECUTIVE_ERRORS))
        .run();

    assert_eq!(summary.stop_reason, StopReason::ErrorBudgetExhausted);
    assert_eq!(summary.telemetry.total_frames, 0);

    let _ = std::fs::remove_file(&input);
}

#[test]
fn test_nine_read_errors_keep_session_alive() {
    let Some(input) = synthesize_clip("budget-edge-in.mp4") else {
        return;
    };

    let summary = open_session(SessionConfig::new(&input).with_output(None))
        .with_packet_source(FlakySource::new(None, MAX_CONSECUTIVE_ERRORS - 1))
        .run();

    assert_eq!(summary.stop_reason, StopReason::EndOfStream);

    let _ = std::fs::remove_file(&input);
}

#[test]
fn test_decoded_packets_reset_error_budget() {
    let Some(input) = synthesize_clip("budget-reset-in.mp4") else {
        return;
    };

    let packets = AvInput::open(&input, &TransportOptions::default()).unwrap();
    let summary = open_session(
        SessionConfig::new(&input)
            .with_output(None)
            .with_resize(None),
    )
    .with_packet_source(FlakySource::new(Some(packets), MAX_CONSECUTIVE_ERRORS - 1))
    .run();

    assert_eq!(summary.stop_reason, StopReason::EndOfStream);
    assert_eq!(summary.telemetry.total_frames, FIXTURE_FRAMES as u64);

    let _ = std::fs::remove_file(&input);
}
