use ffmpeg_next::{Dictionary, codec::Id, format::Pixel};

use crate::{
    error::PipeError,
    hw::{self, HwFramePool},
    packet::RawPacket,
    stream::AvStream,
};

pub const DECODER_THREADS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderKind {
    Hardware,
    Software,
}

/// The one active video decoder of a session.
///
/// Selection only ever moves from hardware to software, never back.
pub enum DecoderInstance {
    Hardware {
        name: String,
        decoder: ffmpeg_next::codec::decoder::Video,
        pool: Option<HwFramePool>,
    },
    Software {
        name: String,
        decoder: ffmpeg_next::codec::decoder::Video,
    },
}

/// Open options for a decoder of `kind` on `codec_id`.
///
/// Both paths skip the in-loop deblocking filter.
pub fn decoder_options(kind: DecoderKind, codec_id: Id) -> Dictionary<'static> {
    let mut opts = Dictionary::new();
    opts.set("threads", &DECODER_THREADS.to_string());
    opts.set("skip_loop_filter", "all");
    opts.set("skip_frame", "default");
    match kind {
        DecoderKind::Hardware => {
            opts.set("zerocopy", "1");
            opts.set("strict", "experimental");
            if codec_id == Id::H264 {
                opts.set("flags", "+low_delay");
                opts.set("flags2", "+fast");
            }
        }
        DecoderKind::Software => opts.set("strict", "normal"),
    }
    opts
}

fn decoder_context(
    codec: ffmpeg_next::Codec,
    stream: &AvStream,
) -> Result<ffmpeg_next::codec::Context, PipeError> {
    let mut ctx = ffmpeg_next::codec::Context::new_with_codec(codec);
    ctx.set_parameters(stream.parameters().clone())
        .map_err(|source| PipeError::DecoderOpen {
            name: codec.name().to_string(),
            source,
        })?;
    ctx.set_threading(decoder_threading());
    Ok(ctx)
}

fn decoder_threading() -> ffmpeg_next::codec::threading::Config {
    let mut config = ffmpeg_next::codec::threading::Config::default();
    config.kind = ffmpeg_next::codec::threading::Type::Frame;
    config.count = DECODER_THREADS;
    config
}

impl DecoderInstance {
    /// Opens a hardware decoder when one exists for the stream's codec and
    /// falls back to the software decoder on any failure along the way.
    pub fn select(stream: &AvStream) -> anyhow::Result<Self> {
        if let Some(codec) = hw::find_hw_decoder(stream.codec_id()) {
            match Self::open_hardware(codec, stream) {
                Ok(instance) => return Ok(instance),
                Err(e) => {
                    log::warn!(
                        "hardware decoder {} failed: {:#}, falling back to software",
                        codec.name(),
                        e
                    );
                }
            }
        }
        Self::open_software(stream)
    }

    fn open_hardware(codec: ffmpeg_next::Codec, stream: &AvStream) -> anyhow::Result<Self> {
        let name = codec.name().to_string();
        log::info!("trying hardware decoder: {}", name);

        let ctx = decoder_context(codec, stream)?;
        let mut decoder = ctx
            .decoder()
            .open_as_with(codec, decoder_options(DecoderKind::Hardware, stream.codec_id()))
            .and_then(|opened| opened.video())
            .map_err(|source| PipeError::DecoderOpen {
                name: name.clone(),
                source,
            })?;
        log::info!("opened hardware decoder: {}", name);

        let width = if decoder.width() > 0 { decoder.width() } else { stream.width() };
        let height = if decoder.height() > 0 { decoder.height() } else { stream.height() };
        let pool = match HwFramePool::create(width, height) {
            Ok(pool) => match unsafe { pool.attach(decoder.as_mut_ptr()) } {
                Ok(()) => {
                    log::info!(
                        "hardware frame pool ready: {:?} {}x{}, {} surfaces",
                        pool.sw_format(),
                        pool.width(),
                        pool.height(),
                        hw::HW_POOL_SIZE
                    );
                    Some(pool)
                }
                Err(e) => {
                    log::warn!("hardware frame pool not attached: {:#}", e);
                    None
                }
            },
            Err(e) => {
                log::warn!("hardware frame pool unavailable, decoding without it: {:#}", e);
                None
            }
        };

        Ok(DecoderInstance::Hardware {
            name,
            decoder,
            pool,
        })
    }

    fn open_software(stream: &AvStream) -> anyhow::Result<Self> {
        let codec_id = stream.codec_id();
        let codec =
            ffmpeg_next::decoder::find(codec_id).ok_or(PipeError::DecoderNotFound(codec_id))?;
        let name = codec.name().to_string();

        let ctx = decoder_context(codec, stream)?;
        let decoder = ctx
            .decoder()
            .open_as_with(codec, decoder_options(DecoderKind::Software, codec_id))
            .and_then(|opened| opened.video())
            .map_err(|source| PipeError::DecoderOpen {
                name: name.clone(),
                source,
            })?;
        log::info!("using software decoder: {}", name);

        Ok(DecoderInstance::Software { name, decoder })
    }

    pub fn kind(&self) -> DecoderKind {
        match self {
            DecoderInstance::Hardware { .. } => DecoderKind::Hardware,
            DecoderInstance::Software { .. } => DecoderKind::Software,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            DecoderInstance::Hardware { name, .. } | DecoderInstance::Software { name, .. } => name,
        }
    }

    fn inner(&self) -> &ffmpeg_next::codec::decoder::Video {
        match self {
            DecoderInstance::Hardware { decoder, .. } | DecoderInstance::Software { decoder, .. } => {
                decoder
            }
        }
    }

    fn inner_mut(&mut self) -> &mut ffmpeg_next::codec::decoder::Video {
        match self {
            DecoderInstance::Hardware { decoder, .. } | DecoderInstance::Software { decoder, .. } => {
                decoder
            }
        }
    }

    pub fn width(&self) -> u32 {
        self.inner().width()
    }

    pub fn height(&self) -> u32 {
        self.inner().height()
    }

    /// Host-memory pixel format frames end up in. Hardware decoders that
    /// report a device format map to their pool's software format.
    pub fn output_format(&self) -> Pixel {
        let format = self.inner().format();
        match self {
            DecoderInstance::Software { .. } => format,
            DecoderInstance::Hardware { pool, .. } => {
                if format == Pixel::None || hw::is_hw_format(format) {
                    pool.as_ref().map(|p| p.sw_format()).unwrap_or(Pixel::NV12)
                } else {
                    format
                }
            }
        }
    }

    pub fn send_packet(&mut self, packet: &RawPacket) -> Result<(), ffmpeg_next::Error> {
        self.inner_mut().send_packet(packet.packet())
    }

    pub fn send_eof(&mut self) -> Result<(), ffmpeg_next::Error> {
        self.inner_mut().send_eof()
    }

    /// Receives into `frame`, overwriting it. Returns false when the decoder
    /// needs more input or is fully drained.
    pub fn receive_frame(&mut self, frame: &mut ffmpeg_next::frame::Video) -> anyhow::Result<bool> {
        match self.inner_mut().receive_frame(frame) {
            Ok(()) => Ok(true),
            Err(ffmpeg_next::Error::Eof) => Ok(false),
            Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::util::error::EAGAIN => {
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Codec identity and decoded picture geometry, fixed for the session.
///
/// `encoder_format` is the pixel format the recording encoder was opened
/// with, or None when nothing is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecDescriptor {
    pub codec_id: Id,
    pub width: u32,
    pub height: u32,
    pub pixel_format: Pixel,
    pub encoder_format: Option<Pixel>,
}

impl CodecDescriptor {
    pub fn new(
        decoder_name: &str,
        codec_id: Id,
        width: u32,
        height: u32,
        pixel_format: Pixel,
    ) -> Result<Self, PipeError> {
        if width == 0 || height == 0 || pixel_format == Pixel::None {
            return Err(PipeError::CodecParameters {
                name: decoder_name.to_string(),
                width,
                height,
                format: pixel_format,
            });
        }
        Ok(Self {
            codec_id,
            width,
            height,
            pixel_format,
            encoder_format: None,
        })
    }

    pub fn resolve(stream: &AvStream, decoder: &DecoderInstance) -> Result<Self, PipeError> {
        let width = if decoder.width() > 0 { decoder.width() } else { stream.width() };
        let height = if decoder.height() > 0 { decoder.height() } else { stream.height() };
        Self::new(
            decoder.name(),
            stream.codec_id(),
            width,
            height,
            decoder.output_format(),
        )
    }

    pub fn with_encoder_format(mut self, format: Pixel) -> Self {
        self.encoder_format = Some(format);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_software_options_skip_loop_filter() {
        let opts = decoder_options(DecoderKind::Software, Id::H264);
        assert_eq!(opts.get("threads"), Some("4"));
        assert_eq!(opts.get("skip_loop_filter"), Some("all"));
        assert_eq!(opts.get("skip_frame"), Some("default"));
        assert_eq!(opts.get("strict"), Some("normal"));
        assert_eq!(opts.get("zerocopy"), None);
        assert_eq!(opts.get("flags"), None);
    }

    #[test]
    fn test_hardware_options() {
        let opts = decoder_options(DecoderKind::Hardware, Id::H264);
        assert_eq!(opts.get("skip_loop_filter"), Some("all"));
        assert_eq!(opts.get("skip_frame"), Some("default"));
        assert_eq!(opts.get("zerocopy"), Some("1"));
        assert_eq!(opts.get("strict"), Some("experimental"));
        assert_eq!(opts.get("flags"), Some("+low_delay"));
        assert_eq!(opts.get("flags2"), Some("+fast"));

        let hevc = decoder_options(DecoderKind::Hardware, Id::HEVC);
        assert_eq!(hevc.get("skip_loop_filter"), Some("all"));
        assert_eq!(hevc.get("flags"), None);
        assert_eq!(hevc.get("flags2"), None);
    }

    #[test]
    fn test_descriptor_rejects_missing_geometry() {
        let err = CodecDescriptor::new("h264", Id::H264, 0, 480, Pixel::YUV420P).unwrap_err();
        assert_eq!(err.reason(), "codec-parameters");
        assert!(err.to_string().contains("h264"));

        let err = CodecDescriptor::new("h264", Id::H264, 640, 480, Pixel::None).unwrap_err();
        assert!(matches!(err, PipeError::CodecParameters { width: 640, .. }));

        let err = anyhow::Error::from(err);
        assert_eq!(
            err.downcast_ref::<PipeError>().map(PipeError::reason),
            Some("codec-parameters")
        );
    }

    #[test]
    fn test_descriptor_encoder_format() {
        let codec = CodecDescriptor::new("h264", Id::H264, 640, 480, Pixel::YUV420P).unwrap();
        assert_eq!(codec.encoder_format, None);
        let codec = codec.with_encoder_format(Pixel::NV12);
        assert_eq!(codec.encoder_format, Some(Pixel::NV12));
        assert_eq!(codec.pixel_format, Pixel::YUV420P);
    }
}
