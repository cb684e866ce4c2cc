use ffmpeg_next::{Dictionary, Rational, codec::Id, format::Pixel};

use crate::{
    error::PipeError,
    packet::RawPacket,
    scaler::{Geometry, Scaler},
};

pub const ENCODER_TIME_BASE: Rational = Rational(1, 30);
pub const ENCODER_FRAME_RATE: Rational = Rational(30, 1);
pub const ENCODER_BIT_RATE: usize = 4_000_000;
pub const ENCODER_GOP: u32 = 30;
pub const ENCODER_THREADS: usize = 4;

#[derive(Debug, Clone)]
pub struct Settings {
    pub width: u32,
    pub height: u32,
    /// Format of the frames handed to `send_frame`.
    pub input_format: Pixel,
    pub time_base: Rational,
    pub frame_rate: Rational,
    pub bit_rate: usize,
    pub gop: u32,
}

impl Settings {
    pub fn new(width: u32, height: u32, input_format: Pixel) -> Self {
        Self {
            width,
            height,
            input_format,
            time_base: ENCODER_TIME_BASE,
            frame_rate: ENCODER_FRAME_RATE,
            bit_rate: ENCODER_BIT_RATE,
            gop: ENCODER_GOP,
        }
    }
}

/// Preferred encoder library for a source codec, if any.
pub fn encoder_name_for(codec_id: Id) -> Option<&'static str> {
    match codec_id {
        Id::H264 => Some("libx264"),
        Id::HEVC => Some("libx265"),
        _ => None,
    }
}

/// The preferred encoder when this FFmpeg build has it, otherwise the
/// default encoder registered for the codec id.
pub fn find_encoder(codec_id: Id) -> Result<ffmpeg_next::Codec, PipeError> {
    if let Some(name) = encoder_name_for(codec_id) {
        if let Some(codec) = ffmpeg_next::encoder::find_by_name(name) {
            return Ok(codec);
        }
        log::warn!("encoder {} not available, using the default for {:?}", name, codec_id);
    }
    ffmpeg_next::encoder::find(codec_id).ok_or(PipeError::EncoderNotFound(codec_id))
}

pub fn low_latency_options(encoder_name: &str) -> Dictionary<'static> {
    let mut opts = Dictionary::new();
    opts.set("threads", &ENCODER_THREADS.to_string());
    match encoder_name {
        "libx264" => {
            opts.set("preset", "ultrafast");
            opts.set("tune", "zerolatency");
            opts.set("profile", "baseline");
        }
        "libx265" => {
            opts.set("preset", "ultrafast");
            opts.set("tune", "zerolatency");
            opts.set("x265-params", "rc-lookahead=0:b-adapt=0:bframes=0:scenecut=0");
        }
        _ => {}
    }
    opts
}

/// Picks the encoder input format for frames arriving in `source`.
///
/// RGB input goes to yuv420p; anything the encoder does not list is
/// replaced by its first supported format.
pub fn pixel_format_for_encoder(source: Pixel, supported: &[Pixel]) -> Pixel {
    if supported.is_empty() || supported.contains(&source) {
        return match source {
            Pixel::RGB24 | Pixel::BGR24 if supported.is_empty() => Pixel::YUV420P,
            _ => source,
        };
    }
    match source {
        Pixel::RGB24 | Pixel::BGR24 if supported.contains(&Pixel::YUV420P) => Pixel::YUV420P,
        _ => supported[0],
    }
}

pub struct Encoder {
    inner: ffmpeg_next::codec::encoder::Video,
    name: String,
    format: Pixel,
    time_base: Rational,
    scaler: Option<Scaler>,
    scaled: ffmpeg_next::frame::Video,
}

impl Encoder {
    pub fn open(
        codec: ffmpeg_next::Codec,
        settings: &Settings,
        global_header: bool,
    ) -> anyhow::Result<Self> {
        let name = codec.name().to_string();
        let supported: Vec<Pixel> = codec
            .video()
            .ok()
            .and_then(|video| video.formats().map(|formats| formats.collect()))
            .unwrap_or_default();
        let format = pixel_format_for_encoder(settings.input_format, &supported);

        let mut encoder = ffmpeg_next::codec::Context::new_with_codec(codec)
            .encoder()
            .video()?;
        encoder.set_width(settings.width);
        encoder.set_height(settings.height);
        encoder.set_format(format);
        encoder.set_time_base(settings.time_base);
        encoder.set_frame_rate(Some(settings.frame_rate));
        encoder.set_bit_rate(settings.bit_rate);
        encoder.set_gop(settings.gop);
        encoder.set_max_b_frames(0);
        if global_header {
            encoder.set_flags(ffmpeg_next::codec::Flags::GLOBAL_HEADER);
        }

        let encoder = encoder
            .open_as_with(codec, low_latency_options(&name))
            .map_err(|source| PipeError::EncoderOpen {
                name: name.clone(),
                source,
            })?;

        let time_base: Rational = unsafe { (*encoder.0.as_ptr()).time_base.into() };
        log::info!(
            "encoder opened: {} {}x{} {:?}, time base {}",
            name,
            settings.width,
            settings.height,
            format,
            time_base
        );

        Ok(Self {
            inner: encoder,
            name,
            format,
            time_base,
            scaler: None,
            scaled: ffmpeg_next::frame::Video::empty(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pixel format the encoder was opened with.
    pub fn format(&self) -> Pixel {
        self.format
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub(crate) fn inner(&self) -> &ffmpeg_next::codec::encoder::Video {
        &self.inner
    }

    /// Stamps `frame` with `index` as its pts and submits it, converting
    /// through a reused scaler when its format or size differs.
    pub fn send_frame(
        &mut self,
        frame: &mut ffmpeg_next::frame::Video,
        index: i64,
    ) -> anyhow::Result<()> {
        let target = Geometry::new(self.inner.format(), self.inner.width(), self.inner.height());
        if Geometry::of(frame) == target {
            frame.set_pts(Some(index));
            self.inner.send_frame(frame)?;
            return Ok(());
        }

        if self.scaler.is_none() {
            log::info!(
                "encoder {} converts {:?} input to {:?}",
                self.name,
                Geometry::of(frame),
                target
            );
            self.scaler = Some(Scaler::new(
                Geometry::of(frame),
                target,
                ffmpeg_next::software::scaling::flag::Flags::BILINEAR,
            )?);
        }
        if let Some(scaler) = self.scaler.as_mut() {
            scaler.run(frame, &mut self.scaled)?;
        }
        self.scaled.set_pts(Some(index));
        self.inner.send_frame(&self.scaled)?;
        Ok(())
    }

    pub fn send_eof(&mut self) -> anyhow::Result<()> {
        self.inner.send_eof()?;
        Ok(())
    }

    /// Next finished packet in the encoder time base, or None when the
    /// encoder needs more input or is drained.
    pub fn receive_packet(&mut self) -> anyhow::Result<Option<RawPacket>> {
        let mut packet = ffmpeg_next::codec::packet::Packet::empty();
        match self.inner.receive_packet(&mut packet) {
            Ok(()) => Ok(Some(RawPacket::new(packet, self.time_base))),
            Err(ffmpeg_next::Error::Other { errno })
                if errno == ffmpeg_next::util::error::EAGAIN =>
            {
                Ok(None)
            }
            Err(ffmpeg_next::Error::Eof) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}
