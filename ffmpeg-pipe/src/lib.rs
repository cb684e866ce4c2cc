/// Registers FFmpeg components and the network layer, and quiets FFmpeg's
/// own logging down to warnings. Call once at startup before opening inputs.
pub fn init() -> anyhow::Result<()> {
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("ffmpeg_next init: {}", e))?;
    ffmpeg_next::format::network::init();
    ffmpeg_next::util::log::set_level(ffmpeg_next::util::log::Level::Warning);
    Ok(())
}

/// Tears down the network layer registered by [`init`].
pub fn deinit() {
    ffmpeg_next::format::network::deinit();
}

pub mod convert;
pub mod cpu;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod hw;
pub mod input;
pub mod output;
pub mod packet;
pub mod recorder;
pub mod scaler;
pub mod session;
pub mod stream;
pub mod telemetry;
