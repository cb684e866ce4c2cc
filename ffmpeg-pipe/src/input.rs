use std::collections::HashMap;
use std::path::Path;

use ffmpeg_next::{Dictionary, Rational};

use crate::{
    error::PipeError,
    packet::{RawPacket, ReadOutcome},
    stream::AvStream,
};

/// Demuxer options applied to every session, whatever the user asked for.
///
/// Forces interleaved TCP for RTSP, bounds probing to five seconds and turns
/// off demuxer-side buffering so reads follow the live edge.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub rtsp_transport: String,
    /// Socket timeout in microseconds.
    pub socket_timeout_us: u64,
    pub analyze_duration_us: u64,
    pub probe_size: u64,
    pub buffer_size: u64,
    pub reorder_queue_size: u32,
    /// Maximum demux delay in microseconds.
    pub max_delay_us: u64,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            rtsp_transport: "tcp".to_string(),
            socket_timeout_us: 5_000_000,
            analyze_duration_us: 5_000_000,
            probe_size: 5_000_000,
            buffer_size: 1_024_000,
            reorder_queue_size: 0,
            max_delay_us: 500_000,
        }
    }
}

impl TransportOptions {
    pub fn to_dictionary(&self) -> Dictionary<'static> {
        let mut opts = Dictionary::new();
        opts.set("rtsp_transport", &self.rtsp_transport);
        opts.set("rtsp_flags", "prefer_tcp");
        opts.set("timeout", &self.socket_timeout_us.to_string());
        opts.set("analyzeduration", &self.analyze_duration_us.to_string());
        opts.set("probesize", &self.probe_size.to_string());
        opts.set("buffer_size", &self.buffer_size.to_string());
        opts.set("reorder_queue_size", &self.reorder_queue_size.to_string());
        opts.set("max_delay", &self.max_delay_us.to_string());
        opts.set("fflags", "nobuffer+flush_packets");
        opts
    }
}

/// An opened, probed input with its selected video stream.
/// Where a session pulls demuxed packets from.
pub trait PacketSource {
    /// Stream whose packets go to the decoder; all others are dropped.
    fn video_stream_index(&self) -> usize;

    /// One packet, end of stream, or a read error that leaves the source
    /// usable for the next call.
    fn read_packet(&mut self) -> Result<ReadOutcome, ffmpeg_next::Error>;
}

pub struct AvInput {
    inner: ffmpeg_next::format::context::Input,
    streams: HashMap<usize, AvStream>,
    video_stream_index: usize,
}

impl AvInput {
    pub fn open(url: &str, transport: &TransportOptions) -> anyhow::Result<Self> {
        let input = ffmpeg_next::format::input_with_dictionary(Path::new(url), transport.to_dictionary())
            .map_err(|source| PipeError::Connect {
                url: url.to_string(),
                source,
            })?;

        let video_stream_index = input
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .map(|stream| stream.index())
            .ok_or_else(|| PipeError::NoVideoStream(url.to_string()))?;

        let mut streams = HashMap::new();
        for stream in input.streams() {
            streams.insert(stream.index(), AvStream::from(stream));
        }

        log::info!(
            "opened {} ({}), {} streams, video stream index {}",
            url,
            input.format().name(),
            streams.len(),
            video_stream_index
        );

        Ok(Self {
            inner: input,
            streams,
            video_stream_index,
        })
    }

    pub fn streams(&self) -> &HashMap<usize, AvStream> {
        &self.streams
    }

    pub fn video_stream_index(&self) -> usize {
        self.video_stream_index
    }

    pub fn video_stream(&self) -> &AvStream {
        &self.streams[&self.video_stream_index]
    }

    /// Reads the next packet. Errors other than end of stream leave the
    /// input usable for further reads.
    pub fn read_packet(&mut self) -> Result<ReadOutcome, ffmpeg_next::Error> {
        let mut packet = ffmpeg_next::codec::packet::Packet::empty();
        match packet.read(&mut self.inner) {
            Ok(()) => {
                let time_base = self
                    .streams
                    .get(&packet.stream())
                    .map(|stream| stream.time_base())
                    .unwrap_or(Rational(0, 1));
                Ok(ReadOutcome::Packet(RawPacket::new(packet, time_base)))
            }
            Err(ffmpeg_next::Error::Eof) => Ok(ReadOutcome::EndOfStream),
            Err(err) => Err(err),
        }
    }
}

impl PacketSource for AvInput {
    fn video_stream_index(&self) -> usize {
        AvInput::video_stream_index(self)
    }

    fn read_packet(&mut self) -> Result<ReadOutcome, ffmpeg_next::Error> {
        AvInput::read_packet(self)
    }
}
