/// Fatal reasons a capture session cannot reach the streaming state.
///
/// Carried at the root of the `anyhow::Error` chain so callers can tell the
/// failure apart with `downcast_ref`.
#[derive(Debug, thiserror::Error)]
pub enum PipeError {
    #[error("could not open input {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: ffmpeg_next::Error,
    },

    #[error("no video stream found in {0}")]
    NoVideoStream(String),

    #[error("no decoder available for codec {0:?}")]
    DecoderNotFound(ffmpeg_next::codec::Id),

    #[error("could not open decoder {name}: {source}")]
    DecoderOpen {
        name: String,
        #[source]
        source: ffmpeg_next::Error,
    },

    #[error("decoder {name} reported unusable codec parameters: {width}x{height} {format:?}")]
    CodecParameters {
        name: String,
        width: u32,
        height: u32,
        format: ffmpeg_next::format::Pixel,
    },

    #[error("no encoder available for codec {0:?}")]
    EncoderNotFound(ffmpeg_next::codec::Id),

    #[error("could not open encoder {name}: {source}")]
    EncoderOpen {
        name: String,
        #[source]
        source: ffmpeg_next::Error,
    },

    #[error("could not create output {path}: {source}")]
    Output {
        path: String,
        #[source]
        source: ffmpeg_next::Error,
    },

    #[error("could not write header to {path}: {source}")]
    OutputHeader {
        path: String,
        #[source]
        source: ffmpeg_next::Error,
    },

    #[error("conversion setup failed: {0}")]
    Conversion(String),
}

impl PipeError {
    /// Short machine-friendly name of the failure stage.
    pub fn reason(&self) -> &'static str {
        match self {
            PipeError::Connect { .. } => "connect",
            PipeError::NoVideoStream(_) => "no-video-stream",
            PipeError::DecoderNotFound(_) => "decoder-not-found",
            PipeError::DecoderOpen { .. } => "decoder-open",
            PipeError::CodecParameters { .. } => "codec-parameters",
            PipeError::EncoderNotFound(_) => "encoder-not-found",
            PipeError::EncoderOpen { .. } => "encoder-open",
            PipeError::Output { .. } => "output",
            PipeError::OutputHeader { .. } => "output-header",
            PipeError::Conversion(_) => "conversion",
        }
    }
}
