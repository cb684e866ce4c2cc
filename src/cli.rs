use std::str::FromStr;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use ffmpeg_pipe::{
    convert::TargetFormat,
    session::{self, SessionConfig},
};
use thiserror::Error;

/// RTSP decode benchmark
///
/// Pulls a live stream for a bounded time, decodes it (hardware first),
/// converts frames and optionally re-encodes them into a file while
/// reporting FPS, CPU usage and conversion cost.
#[derive(Parser, Debug)]
#[clap(name = "rtsp-bench")]
pub struct Opt {
    /// Stream to read, e.g. rtsp://camera.local/stream1
    pub url: String,

    /// Container file the converted frames are encoded into.
    #[clap(default_value = session::DEFAULT_OUTPUT)]
    pub output: String,

    /// Decode and convert only; write no file.
    #[clap(long = "no-record")]
    pub no_record: bool,

    /// Keep the decoded frame size.
    #[clap(long = "no-resize")]
    pub no_resize: bool,

    #[clap(long = "color-format", value_enum, default_value_t = ColorFormat::Yuv)]
    pub color_format: ColorFormat,

    /// Map hardware frames for colorspace conversion instead of downloading them.
    #[clap(long = "hw-convert", alias = "use-mpp")]
    pub hw_convert: bool,

    /// Resize target as WIDTHxHEIGHT.
    #[clap(long = "size", default_value = "800x600")]
    pub size: FrameSize,

    /// Session length in seconds.
    #[clap(long = "duration", default_value_t = session::MAX_SESSION_DURATION.as_secs())]
    pub duration: u64,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColorFormat {
    /// Planar YUV as decoded
    Yuv,
    /// Semi-planar YUV 4:2:0
    Nv12,
    /// Packed 24-bit BGR
    Bgr,
}

impl From<ColorFormat> for TargetFormat {
    fn from(format: ColorFormat) -> Self {
        match format {
            ColorFormat::Yuv => TargetFormat::Native,
            ColorFormat::Nv12 => TargetFormat::SemiPlanar,
            ColorFormat::Bgr => TargetFormat::Bgr,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Error, Debug)]
pub enum ParseFrameSizeError {
    #[error("expected WIDTHxHEIGHT, got {0}")]
    Format(String),
    #[error("frame size must be non-zero, got {0}")]
    Zero(String),
}

impl FromStr for FrameSize {
    type Err = ParseFrameSizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (width, height) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| ParseFrameSizeError::Format(s.to_string()))?;
        let width = width
            .trim()
            .parse::<u32>()
            .map_err(|_| ParseFrameSizeError::Format(s.to_string()))?;
        let height = height
            .trim()
            .parse::<u32>()
            .map_err(|_| ParseFrameSizeError::Format(s.to_string()))?;
        if width == 0 || height == 0 {
            return Err(ParseFrameSizeError::Zero(s.to_string()));
        }
        Ok(Self { width, height })
    }
}

impl Opt {
    pub fn into_config(self) -> SessionConfig {
        let output = (!self.no_record).then_some(self.output);
        let resize = (!self.no_resize).then_some((self.size.width, self.size.height));
        SessionConfig::new(self.url)
            .with_output(output)
            .with_resize(resize)
            .with_target_format(self.color_format.into())
            .with_accelerated_conversion(self.hw_convert)
            .with_max_duration(Duration::from_secs(self.duration))
    }
}
