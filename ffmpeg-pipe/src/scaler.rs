use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling::flag::Flags;

/// Format and size of one side of a scaling context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub format: Pixel,
    pub width: u32,
    pub height: u32,
}

impl Geometry {
    pub fn new(format: Pixel, width: u32, height: u32) -> Self {
        Self {
            format,
            width,
            height,
        }
    }

    pub fn of(frame: &ffmpeg_next::frame::Video) -> Self {
        Self::new(frame.format(), frame.width(), frame.height())
    }
}

/// swscale context that rebuilds itself when its input geometry changes.
pub struct Scaler {
    context: ffmpeg_next::software::scaling::Context,
    source: Geometry,
    target: Geometry,
    flags: Flags,
}

impl Scaler {
    pub fn new(source: Geometry, target: Geometry, flags: Flags) -> anyhow::Result<Self> {
        Ok(Self {
            context: Self::context(source, target, flags)?,
            source,
            target,
            flags,
        })
    }

    fn context(
        source: Geometry,
        target: Geometry,
        flags: Flags,
    ) -> anyhow::Result<ffmpeg_next::software::scaling::Context> {
        ffmpeg_next::software::scaling::Context::get(
            source.format,
            source.width,
            source.height,
            target.format,
            target.width,
            target.height,
            flags,
        )
        .map_err(|e| {
            anyhow::anyhow!(
                "scaling context {:?} -> {:?}: {}",
                source,
                target,
                e
            )
        })
    }

    pub fn run(
        &mut self,
        frame: &ffmpeg_next::frame::Video,
        dst: &mut ffmpeg_next::frame::Video,
    ) -> anyhow::Result<()> {
        let input = Geometry::of(frame);
        if input != self.source {
            log::info!(
                "scaler input changed from {:?} to {:?}, rebuilding",
                self.source,
                input
            );
            self.context = Self::context(input, self.target, self.flags)?;
            self.source = input;
        }
        self.context.run(frame, dst).map_err(|e| e.into())
    }
}
