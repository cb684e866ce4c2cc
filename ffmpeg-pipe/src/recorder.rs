//! Encode-and-mux sink for converted frames.

use crate::{
    convert::ConversionPlan,
    decoder::CodecDescriptor,
    encoder::{self, Encoder, Settings},
    output::AvOutput,
};

pub struct Recorder {
    // Dropped before the output it feeds.
    encoder: Encoder,
    output: AvOutput,
    packets_written: u64,
    write_errors: u64,
}

impl Recorder {
    /// Opens the container, the encoder for the source codec and writes the
    /// header. Encoder input is the converted frame geometry.
    pub fn open(
        path: &str,
        codec: &CodecDescriptor,
        plan: &ConversionPlan,
    ) -> anyhow::Result<Self> {
        let mut output = AvOutput::create(path)?;
        let encoder_codec = encoder::find_encoder(codec.codec_id)?;
        let settings = Settings::new(plan.target.width, plan.target.height, plan.target.format);
        let encoder = Encoder::open(encoder_codec, &settings, output.needs_global_header())?;
        output.add_video_stream(encoder_codec, &encoder)?;
        output.write_header()?;
        log::info!(
            "recording to {} with {} ({}x{} {:?})",
            path,
            encoder.name(),
            settings.width,
            settings.height,
            encoder.format()
        );

        Ok(Self {
            encoder,
            output,
            packets_written: 0,
            write_errors: 0,
        })
    }

    /// Encodes one frame as frame number `index` and writes whatever packets
    /// the encoder has ready. Write failures are logged, not returned.
    pub fn push(&mut self, frame: &mut ffmpeg_next::frame::Video, index: i64) -> anyhow::Result<()> {
        self.encoder.send_frame(frame, index)?;
        self.drain();
        Ok(())
    }

    fn drain(&mut self) {
        loop {
            match self.encoder.receive_packet() {
                Ok(Some(packet)) => match self.output.write_packet(packet) {
                    Ok(()) => self.packets_written += 1,
                    Err(e) => {
                        self.write_errors += 1;
                        log::warn!("write packet error: {:#}", e);
                    }
                },
                Ok(None) => break,
                Err(e) => {
                    log::warn!("receive packet error: {:#}", e);
                    break;
                }
            }
        }
    }

    /// Flushes the encoder and writes the container trailer.
    pub fn finish(&mut self) -> anyhow::Result<()> {
        if let Err(e) = self.encoder.send_eof() {
            log::warn!("send eof error: {:#}", e);
        }
        self.drain();
        self.output.finish()?;
        log::info!(
            "recorder finished: {} packets written, {} write errors",
            self.packets_written,
            self.write_errors
        );
        Ok(())
    }

    pub fn packets_written(&self) -> u64 {
        self.packets_written
    }

    pub fn encoder_format(&self) -> ffmpeg_next::format::Pixel {
        self.encoder.format()
    }

    pub fn path(&self) -> &str {
        self.output.path()
    }
}
