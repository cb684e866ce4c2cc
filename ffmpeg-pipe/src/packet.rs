use ffmpeg_next::{Rational, codec::packet::Packet};

/// An encoded packet and the time base its pts/dts/duration are counted in.
pub struct RawPacket {
    packet: Packet,
    time_base: Rational,
}

impl RawPacket {
    pub fn new(packet: Packet, time_base: Rational) -> Self {
        Self { packet, time_base }
    }

    pub fn stream_index(&self) -> usize {
        self.packet.stream()
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    /// Moves pts/dts/duration into `time_base`. Unset timestamps stay unset.
    pub fn rescale_to(&mut self, time_base: Rational) {
        if self.time_base != time_base {
            self.packet.rescale_ts(self.time_base, time_base);
            self.time_base = time_base;
        }
    }

    pub fn packet(&self) -> &Packet {
        &self.packet
    }

    pub fn packet_mut(&mut self) -> &mut Packet {
        &mut self.packet
    }
}

/// What a single demuxer read produced.
pub enum ReadOutcome {
    Packet(RawPacket),
    EndOfStream,
}
