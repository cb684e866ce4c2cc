//! Decoded-frame conversion into the session's target format and size.
//!
//! The strategy is resolved from the configuration and the decoder's
//! announced output, then applied to every frame. Output and staging frames
//! are allocated up front and reused.

use std::fmt;
use std::time::{Duration, Instant};

use ffmpeg_next::ffi;
use ffmpeg_next::format::Pixel;
use ffmpeg_next::frame::Video;
use ffmpeg_next::software::scaling::flag::Flags;

use crate::{
    decoder::CodecDescriptor,
    error::PipeError,
    hw,
    scaler::{Geometry, Scaler},
};

const HWFRAME_MAP_READ: i32 = 1;

/// Output pixel format requested by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetFormat {
    /// Whatever planar chroma format the decoder produces.
    #[default]
    Native,
    /// NV12: one luma plane and one interleaved UV plane.
    SemiPlanar,
    /// Packed 24-bit BGR.
    Bgr,
}

impl TargetFormat {
    pub fn resolve(self, source: Pixel) -> Pixel {
        match self {
            TargetFormat::Native => source,
            TargetFormat::SemiPlanar => Pixel::NV12,
            TargetFormat::Bgr => Pixel::BGR24,
        }
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetFormat::Native => write!(f, "YUV"),
            TargetFormat::SemiPlanar => write!(f, "NV12"),
            TargetFormat::Bgr => write!(f, "BGR"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionStrategy {
    /// Formats and sizes match; the frame is copied as is.
    IdentityCopy,
    /// swscale into the target size and/or format.
    SoftwareScale,
    /// Same-size planar YUV to RGB-family conversion. The accelerated form
    /// maps hardware surfaces into host memory instead of downloading them.
    ColorspaceConvert { accelerated: bool },
    /// Same-size planar 4:2:0 to NV12 by interleaving the chroma planes.
    ChromaInterleave,
}

fn is_rgb_family(format: Pixel) -> bool {
    matches!(
        format,
        Pixel::RGB24 | Pixel::BGR24 | Pixel::RGBA | Pixel::BGRA | Pixel::ARGB | Pixel::ABGR
    )
}

fn is_planar_chroma(format: Pixel) -> bool {
    matches!(
        format,
        Pixel::YUV420P
            | Pixel::YUVJ420P
            | Pixel::YUV422P
            | Pixel::YUVJ422P
            | Pixel::YUV444P
            | Pixel::YUVJ444P
    )
}

fn is_planar_420(format: Pixel) -> bool {
    matches!(format, Pixel::YUV420P | Pixel::YUVJ420P)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionPlan {
    pub source: Geometry,
    pub target: Geometry,
    pub resize: bool,
    pub strategy: ConversionStrategy,
    pub requested: TargetFormat,
    pub accelerate: bool,
}

impl ConversionPlan {
    pub fn resolve(
        codec: &CodecDescriptor,
        target_format: TargetFormat,
        resize: Option<(u32, u32)>,
        accelerate: bool,
    ) -> Self {
        let source = Geometry::new(codec.pixel_format, codec.width, codec.height);
        Self::for_source(source, target_format, resize, accelerate)
    }

    fn for_source(
        source: Geometry,
        requested: TargetFormat,
        resize: Option<(u32, u32)>,
        accelerate: bool,
    ) -> Self {
        let format = requested.resolve(source.format);
        let (width, height) = resize.unwrap_or((source.width, source.height));

        let strategy = if resize.is_some() {
            ConversionStrategy::SoftwareScale
        } else if format == source.format {
            ConversionStrategy::IdentityCopy
        } else if is_rgb_family(format) && is_planar_chroma(source.format) {
            ConversionStrategy::ColorspaceConvert {
                accelerated: accelerate,
            }
        } else if format == Pixel::NV12 && is_planar_420(source.format) {
            ConversionStrategy::ChromaInterleave
        } else {
            ConversionStrategy::SoftwareScale
        };

        Self {
            source,
            target: Geometry::new(format, width, height),
            resize: resize.is_some(),
            strategy,
            requested,
            accelerate,
        }
    }

    /// The same request resolved for frames that actually arrive as
    /// `source`. A resize target keeps its size.
    pub fn rebase(&self, source: Geometry) -> Self {
        let resize = self
            .resize
            .then_some((self.target.width, self.target.height));
        Self::for_source(source, self.requested, resize, self.accelerate)
    }
}

pub struct Converted<'a> {
    pub frame: &'a mut Video,
    /// Time spent in the transform itself.
    pub elapsed: Duration,
}

fn scaler_for(plan: &ConversionPlan) -> Result<Option<Scaler>, PipeError> {
    match plan.strategy {
        ConversionStrategy::SoftwareScale => {
            Some(Scaler::new(plan.source, plan.target, Flags::BILINEAR))
        }
        ConversionStrategy::ColorspaceConvert { .. } => {
            Some(Scaler::new(plan.source, plan.target, Flags::POINT))
        }
        ConversionStrategy::IdentityCopy | ConversionStrategy::ChromaInterleave => None,
    }
    .transpose()
    .map_err(|e| PipeError::Conversion(format!("{:#}", e)))
}

/// Applies a `ConversionPlan` to decoded frames.
///
/// The plan follows the frames: when a host-memory frame's format or size
/// differs from the plan's source, the plan is resolved again for it.
pub struct FrameConverter {
    plan: ConversionPlan,
    scaler: Option<Scaler>,
    staging: Video,
    mapped: Video,
    output: Video,
    fallback_logged: bool,
}

impl FrameConverter {
    pub fn new(plan: ConversionPlan) -> anyhow::Result<Self> {
        let scaler = scaler_for(&plan)?;
        let output = Video::new(plan.target.format, plan.target.width, plan.target.height);

        Ok(Self {
            plan,
            scaler,
            staging: Video::empty(),
            mapped: Video::empty(),
            output,
            fallback_logged: false,
        })
    }

    pub fn plan(&self) -> &ConversionPlan {
        &self.plan
    }

    pub fn convert(&mut self, decoded: &Video) -> anyhow::Result<Converted<'_>> {
        if decoded.width() == 0 || decoded.height() == 0 {
            anyhow::bail!("invalid frame data");
        }
        let hw_backed = hw::has_hw_provenance(decoded);

        if let Some(elapsed) = self.convert_mapped(decoded, hw_backed)? {
            return Ok(Converted {
                frame: &mut self.output,
                elapsed,
            });
        }

        let source = download(decoded, hw_backed, &mut self.staging)?;
        let geometry = Geometry::of(source);
        if geometry != self.plan.source {
            replan(&mut self.plan, &mut self.scaler, &mut self.output, geometry)?;
        }

        let started = Instant::now();
        match self.plan.strategy {
            ConversionStrategy::IdentityCopy => copy_frame(source, &mut self.output)?,
            ConversionStrategy::SoftwareScale | ConversionStrategy::ColorspaceConvert { .. } => {
                let scaler = self.scaler.as_mut().ok_or_else(missing_scaler)?;
                scaler.run(source, &mut self.output)?;
            }
            ConversionStrategy::ChromaInterleave => interleave_frame(source, &mut self.output)?,
        }

        Ok(Converted {
            frame: &mut self.output,
            elapsed: started.elapsed(),
        })
    }

    /// Converts straight from a host mapping of the hardware surface. None
    /// when the frame has to take the download path instead.
    fn convert_mapped(
        &mut self,
        decoded: &Video,
        hw_backed: bool,
    ) -> anyhow::Result<Option<Duration>> {
        let ConversionStrategy::ColorspaceConvert { accelerated: true } = self.plan.strategy else {
            return Ok(None);
        };
        if !hw_backed {
            if !self.fallback_logged {
                log::info!("frames carry no hardware buffer, using software colorspace conversion");
                self.fallback_logged = true;
            }
            return Ok(None);
        }
        if let Err(e) = map_frame(decoded, &mut self.mapped) {
            if !self.fallback_logged {
                log::warn!(
                    "mapping hardware frame failed: {}, using software colorspace conversion",
                    e
                );
                self.fallback_logged = true;
            }
            return Ok(None);
        }

        let scaler = self.scaler.as_mut().ok_or_else(missing_scaler)?;
        let started = Instant::now();
        let result = scaler.run(&self.mapped, &mut self.output);
        let elapsed = started.elapsed();
        unsafe { ffi::av_frame_unref(self.mapped.as_mut_ptr()) };
        result?;
        Ok(Some(elapsed))
    }
}

fn replan(
    plan: &mut ConversionPlan,
    scaler: &mut Option<Scaler>,
    output: &mut Video,
    source: Geometry,
) -> anyhow::Result<()> {
    let next = plan.rebase(source);
    log::info!(
        "decoded frames are {:?}, not {:?}; conversion {:?} -> {:?}",
        source,
        plan.source,
        plan.strategy,
        next.strategy
    );
    *scaler = scaler_for(&next)?;
    if next.target != plan.target {
        *output = Video::new(next.target.format, next.target.width, next.target.height);
    }
    *plan = next;
    Ok(())
}

fn missing_scaler() -> anyhow::Error {
    anyhow::anyhow!("conversion strategy has no scaling context")
}

fn check(ret: i32) -> Result<(), ffmpeg_next::Error> {
    if ret < 0 {
        Err(ffmpeg_next::Error::from(ret))
    } else {
        Ok(())
    }
}

/// Copies pixel data between system-memory frames of equal format and size.
fn copy_frame(src: &Video, dst: &mut Video) -> Result<(), ffmpeg_next::Error> {
    check(unsafe { ffi::av_frame_copy(dst.as_mut_ptr(), src.as_ptr()) })
}

/// Downloads a hardware surface into `dst`, allocating `dst` on first use.
fn transfer_frame(src: &Video, dst: &mut Video) -> Result<(), ffmpeg_next::Error> {
    check(unsafe { ffi::av_hwframe_transfer_data(dst.as_mut_ptr(), src.as_ptr(), 0) })
}

fn map_frame(src: &Video, dst: &mut Video) -> Result<(), ffmpeg_next::Error> {
    unsafe {
        ffi::av_frame_unref(dst.as_mut_ptr());
        check(ffi::av_hwframe_map(dst.as_mut_ptr(), src.as_ptr(), HWFRAME_MAP_READ))
    }
}

/// Returns a host-memory view of `decoded`, downloading through `staging`
/// when the frame lives in a hardware pool.
fn download<'a>(
    decoded: &'a Video,
    hw_backed: bool,
    staging: &'a mut Video,
) -> Result<&'a Video, ffmpeg_next::Error> {
    if hw_backed {
        transfer_frame(decoded, staging)?;
        Ok(staging)
    } else {
        Ok(decoded)
    }
}

pub(crate) fn copy_plane(
    src: &[u8],
    src_stride: usize,
    dst: &mut [u8],
    dst_stride: usize,
    row_bytes: usize,
    rows: usize,
) {
    for row in 0..rows {
        let from = &src[row * src_stride..][..row_bytes];
        dst[row * dst_stride..][..row_bytes].copy_from_slice(from);
    }
}

/// Writes `u[x], v[x]` pairs into `uv` row by row; `width` is in chroma samples.
pub(crate) fn interleave_chroma(
    u: &[u8],
    u_stride: usize,
    v: &[u8],
    v_stride: usize,
    uv: &mut [u8],
    uv_stride: usize,
    width: usize,
    rows: usize,
) {
    for row in 0..rows {
        let u_row = &u[row * u_stride..][..width];
        let v_row = &v[row * v_stride..][..width];
        let uv_row = &mut uv[row * uv_stride..][..width * 2];
        for (pair, (&cb, &cr)) in uv_row.chunks_exact_mut(2).zip(u_row.iter().zip(v_row)) {
            pair[0] = cb;
            pair[1] = cr;
        }
    }
}

fn interleave_frame(src: &Video, dst: &mut Video) -> anyhow::Result<()> {
    if !is_planar_420(src.format()) || dst.format() != Pixel::NV12 {
        anyhow::bail!(
            "chroma interleave needs planar 4:2:0 input and NV12 output, got {:?} -> {:?}",
            src.format(),
            dst.format()
        );
    }
    if src.width() != dst.width() || src.height() != dst.height() {
        anyhow::bail!(
            "frame size changed: {}x{} -> {}x{}",
            src.width(),
            src.height(),
            dst.width(),
            dst.height()
        );
    }

    let width = src.width() as usize;
    let height = src.height() as usize;
    let (chroma_width, chroma_height) = (width.div_ceil(2), height.div_ceil(2));

    let luma_stride = dst.stride(0);
    copy_plane(src.data(0), src.stride(0), dst.data_mut(0), luma_stride, width, height);

    let uv_stride = dst.stride(1);
    interleave_chroma(
        src.data(1),
        src.stride(1),
        src.data(2),
        src.stride(2),
        dst.data_mut(1),
        uv_stride,
        chroma_width,
        chroma_height,
    );
    Ok(())
}

#[cfg(test)]
#[path = "convert_test.rs"]
mod convert_test;
