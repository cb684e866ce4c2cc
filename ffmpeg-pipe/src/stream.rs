use ffmpeg_next::{
    Rational,
    codec::{Id, Parameters},
    format::stream::Stream,
};

/// Metadata of one elementary stream, captured when the input is opened.
#[derive(Clone)]
pub struct AvStream {
    index: usize,
    parameters: Parameters,
    time_base: Rational,
    rate: Rational,
    width: u32,
    height: u32,
}

fn picture_size(parameters: &Parameters) -> (u32, u32) {
    let raw = unsafe { &*parameters.as_ptr() };
    (raw.width.max(0) as u32, raw.height.max(0) as u32)
}

impl AvStream {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn codec_id(&self) -> Id {
        self.parameters.id()
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    /// Average frame rate as advertised by the demuxer; may be 0/0 for live sources.
    pub fn rate(&self) -> Rational {
        self.rate
    }

    /// Picture width from the codec parameters, 0 when not yet probed.
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

impl From<Stream<'_>> for AvStream {
    fn from(stream: Stream<'_>) -> Self {
        let parameters = stream.parameters();
        let (width, height) = picture_size(&parameters);
        Self {
            index: stream.index(),
            parameters,
            time_base: stream.time_base(),
            rate: stream.avg_frame_rate(),
            width,
            height,
        }
    }
}
