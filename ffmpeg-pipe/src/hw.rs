//! Hardware-accelerated decode discovery and device-backed frame pools.
//!
//! Only a closed set of codecs has hardware candidates: Rockchip MPP decoders
//! first, then V4L2 mem2mem. Everything else decodes in software.

use std::ffi::CString;
use std::ptr;

use ffmpeg_next::codec::Id;
use ffmpeg_next::ffi;
use ffmpeg_next::format::Pixel;

pub const DRM_RENDER_NODE: &str = "/dev/dri/renderD128";
pub const HW_POOL_SIZE: i32 = 20;
pub const HW_POOL_SW_FORMAT: Pixel = Pixel::YUV420P;

pub fn hw_decoder_candidates(codec_id: Id) -> &'static [&'static str] {
    match codec_id {
        Id::H264 => &["h264_rkmpp", "h264_v4l2m2m"],
        Id::HEVC => &["hevc_rkmpp", "hevc_v4l2m2m"],
        Id::VP8 => &["vp8_rkmpp", "vp8_v4l2m2m"],
        Id::VP9 => &["vp9_rkmpp", "vp9_v4l2m2m"],
        _ => &[],
    }
}

/// Try to find a hardware-accelerated decoder for the given codec ID.
/// Returns the first one this FFmpeg build provides, or None.
pub fn find_hw_decoder(codec_id: Id) -> Option<ffmpeg_next::Codec> {
    for name in hw_decoder_candidates(codec_id) {
        if let Some(codec) = ffmpeg_next::decoder::find_by_name(name) {
            log::info!("found hardware decoder: {}", name);
            return Some(codec);
        }
    }
    None
}

/// Pixel formats whose frames live in device memory rather than host memory.
pub fn is_hw_format(format: Pixel) -> bool {
    matches!(
        format,
        Pixel::DRM_PRIME | Pixel::VAAPI | Pixel::CUDA | Pixel::QSV
    )
}

/// True when the frame is backed by a hardware frame pool.
pub fn has_hw_provenance(frame: &ffmpeg_next::frame::Video) -> bool {
    unsafe { !(*frame.as_ptr()).hw_frames_ctx.is_null() }
}

struct BufferRef(*mut ffi::AVBufferRef);

impl Drop for BufferRef {
    fn drop(&mut self) {
        unsafe { ffi::av_buffer_unref(&mut self.0) }
    }
}

/// DRM device plus a fixed-depth pool of DRM_PRIME surfaces.
pub struct HwFramePool {
    frames: BufferRef,
    _device: BufferRef,
    sw_format: Pixel,
    width: u32,
    height: u32,
}

impl HwFramePool {
    pub fn create(width: u32, height: u32) -> anyhow::Result<Self> {
        if width == 0 || height == 0 {
            anyhow::bail!("unknown frame size {}x{}", width, height);
        }

        let node = CString::new(DRM_RENDER_NODE)?;
        let mut device_ptr: *mut ffi::AVBufferRef = ptr::null_mut();
        let ret = unsafe {
            ffi::av_hwdevice_ctx_create(
                &mut device_ptr,
                ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_DRM,
                node.as_ptr(),
                ptr::null_mut(),
                0,
            )
        };
        if ret < 0 {
            anyhow::bail!(
                "create hardware device {}: {}",
                DRM_RENDER_NODE,
                ffmpeg_next::Error::from(ret)
            );
        }
        let device = BufferRef(device_ptr);

        let frames_ptr = unsafe { ffi::av_hwframe_ctx_alloc(device.0) };
        if frames_ptr.is_null() {
            anyhow::bail!("allocate hardware frames context");
        }
        let frames = BufferRef(frames_ptr);

        unsafe {
            let ctx = (*frames.0).data as *mut ffi::AVHWFramesContext;
            (*ctx).format = Pixel::DRM_PRIME.into();
            (*ctx).sw_format = HW_POOL_SW_FORMAT.into();
            (*ctx).width = width as i32;
            (*ctx).height = height as i32;
            (*ctx).initial_pool_size = HW_POOL_SIZE;
        }

        let ret = unsafe { ffi::av_hwframe_ctx_init(frames.0) };
        if ret < 0 {
            anyhow::bail!(
                "initialize hardware frames context: {}",
                ffmpeg_next::Error::from(ret)
            );
        }

        Ok(Self {
            frames,
            _device: device,
            sw_format: HW_POOL_SW_FORMAT,
            width,
            height,
        })
    }

    /// Attaches a new reference to this pool as the codec's frame context.
    ///
    /// # Safety
    /// `ctx` must point to a live codec context.
    pub unsafe fn attach(&self, ctx: *mut ffi::AVCodecContext) -> anyhow::Result<()> {
        let frames_ref = unsafe { ffi::av_buffer_ref(self.frames.0) };
        if frames_ref.is_null() {
            anyhow::bail!("reference hardware frames context");
        }
        unsafe {
            ffi::av_buffer_unref(&mut (*ctx).hw_frames_ctx);
            (*ctx).hw_frames_ctx = frames_ref;
        }
        Ok(())
    }

    pub fn sw_format(&self) -> Pixel {
        self.sw_format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}
