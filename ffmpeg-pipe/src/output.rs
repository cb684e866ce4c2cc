use ffmpeg_next::Rational;

use crate::{encoder::Encoder, error::PipeError, packet::RawPacket};

/// Container file with a single video stream.
pub struct AvOutput {
    inner: ffmpeg_next::format::context::Output,
    path: String,
    stream_index: Option<usize>,
    have_written_header: bool,
    have_written_trailer: bool,
}

impl AvOutput {
    pub fn create(path: &str) -> anyhow::Result<Self> {
        let output = ffmpeg_next::format::output(&path).map_err(|source| PipeError::Output {
            path: path.to_string(),
            source,
        })?;
        log::info!("output {} uses container {}", path, output.format().name());
        Ok(Self {
            inner: output,
            path: path.to_string(),
            stream_index: None,
            have_written_header: false,
            have_written_trailer: false,
        })
    }

    /// Whether encoders feeding this container must put codec headers in
    /// extradata instead of the bitstream.
    pub fn needs_global_header(&self) -> bool {
        self.inner
            .format()
            .flags()
            .contains(ffmpeg_next::format::Flags::GLOBAL_HEADER)
    }

    pub fn add_video_stream(
        &mut self,
        codec: ffmpeg_next::Codec,
        encoder: &Encoder,
    ) -> anyhow::Result<usize> {
        let mut stream = self.inner.add_stream(codec).map_err(|source| PipeError::Output {
            path: self.path.clone(),
            source,
        })?;
        stream.set_parameters(encoder.inner());
        stream.set_time_base(encoder.time_base());
        let index = stream.index();
        self.stream_index = Some(index);
        Ok(index)
    }

    pub fn write_header(&mut self) -> anyhow::Result<()> {
        if self.stream_index.is_none() {
            anyhow::bail!("output {} has no stream", self.path);
        }
        self.inner
            .write_header()
            .map_err(|source| PipeError::OutputHeader {
                path: self.path.clone(),
                source,
            })?;
        self.have_written_header = true;
        Ok(())
    }

    /// Time base the muxer settled on; only final after the header is written.
    pub fn stream_time_base(&self) -> Option<Rational> {
        self.stream_index
            .and_then(|index| self.inner.stream(index))
            .map(|stream| stream.time_base())
    }

    pub fn write_packet(&mut self, mut packet: RawPacket) -> anyhow::Result<()> {
        if !self.have_written_header || self.have_written_trailer {
            anyhow::bail!("output {} is not accepting packets", self.path);
        }
        let (index, out_time_base) = match (self.stream_index, self.stream_time_base()) {
            (Some(index), Some(time_base)) => (index, time_base),
            _ => anyhow::bail!("stream not found"),
        };

        packet.rescale_to(out_time_base);
        let p = packet.packet_mut();
        p.set_stream(index);
        p.set_position(-1);
        p.write_interleaved(&mut self.inner)?;
        Ok(())
    }

    /// Writes the trailer once; later calls are no-ops.
    pub fn finish(&mut self) -> anyhow::Result<()> {
        if self.have_written_header && !self.have_written_trailer {
            self.have_written_trailer = true;
            self.inner.write_trailer()?;
            log::info!("output {} finalized", self.path);
        }
        Ok(())
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}
