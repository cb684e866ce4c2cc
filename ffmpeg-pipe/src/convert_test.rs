use super::*;
use ffmpeg_next::codec::Id;

fn descriptor(format: Pixel, width: u32, height: u32) -> CodecDescriptor {
    CodecDescriptor {
        codec_id: Id::H264,
        width,
        height,
        pixel_format: format,
        encoder_format: None,
    }
}

fn patterned_yuv420p(width: u32, height: u32) -> Video {
    let mut frame = Video::new(Pixel::YUV420P, width, height);
    for plane in 0..3 {
        let stride = frame.stride(plane);
        let rows = (if plane == 0 { height } else { height.div_ceil(2) }) as usize;
        let cols = (if plane == 0 { width } else { width.div_ceil(2) }) as usize;
        let data = frame.data_mut(plane);
        for row in 0..rows {
            for col in 0..cols {
                data[row * stride + col] = ((row * 7 + col * 3 + plane * 50) % 251) as u8;
            }
        }
    }
    frame
}

fn row(frame: &Video, plane: usize, row: usize, len: usize) -> &[u8] {
    &frame.data(plane)[row * frame.stride(plane)..][..len]
}

#[test]
fn test_resize_always_scales() {
    let plan = ConversionPlan::resolve(
        &descriptor(Pixel::YUV420P, 1920, 1080),
        TargetFormat::Native,
        Some((800, 600)),
        false,
    );
    assert_eq!(plan.strategy, ConversionStrategy::SoftwareScale);
    assert_eq!(plan.target, Geometry::new(Pixel::YUV420P, 800, 600));
    assert!(plan.resize);
}

#[test]
fn test_same_format_is_identity() {
    let plan = ConversionPlan::resolve(
        &descriptor(Pixel::YUV420P, 640, 480),
        TargetFormat::Native,
        None,
        true,
    );
    assert_eq!(plan.strategy, ConversionStrategy::IdentityCopy);
    assert_eq!(plan.target, plan.source);

    let plan = ConversionPlan::resolve(
        &descriptor(Pixel::NV12, 640, 480),
        TargetFormat::SemiPlanar,
        None,
        false,
    );
    assert_eq!(plan.strategy, ConversionStrategy::IdentityCopy);
}

#[test]
fn test_bgr_from_planar_is_colorspace() {
    let codec = descriptor(Pixel::YUV420P, 640, 480);
    let plan = ConversionPlan::resolve(&codec, TargetFormat::Bgr, None, true);
    assert_eq!(
        plan.strategy,
        ConversionStrategy::ColorspaceConvert { accelerated: true }
    );
    assert_eq!(plan.target.format, Pixel::BGR24);

    let plan = ConversionPlan::resolve(&codec, TargetFormat::Bgr, None, false);
    assert_eq!(
        plan.strategy,
        ConversionStrategy::ColorspaceConvert { accelerated: false }
    );
}

#[test]
fn test_nv12_from_planar_is_interleave() {
    let plan = ConversionPlan::resolve(
        &descriptor(Pixel::YUV420P, 640, 480),
        TargetFormat::SemiPlanar,
        None,
        false,
    );
    assert_eq!(plan.strategy, ConversionStrategy::ChromaInterleave);
}

#[test]
fn test_other_pairs_fall_back_to_scale() {
    // NV12 decoder output has no planar chroma to feed the colorspace path.
    let plan = ConversionPlan::resolve(
        &descriptor(Pixel::NV12, 640, 480),
        TargetFormat::Bgr,
        None,
        true,
    );
    assert_eq!(plan.strategy, ConversionStrategy::SoftwareScale);
    assert_eq!(plan.target, Geometry::new(Pixel::BGR24, 640, 480));
    assert!(!plan.resize);
}

#[test]
fn test_target_format_display() {
    assert_eq!(TargetFormat::Native.to_string(), "YUV");
    assert_eq!(TargetFormat::SemiPlanar.to_string(), "NV12");
    assert_eq!(TargetFormat::Bgr.to_string(), "BGR");
}

#[test]
fn test_interleave_chroma() {
    let u = [1u8, 2, 3, 0, 4, 5, 6, 0];
    let v = [11u8, 12, 13, 0, 14, 15, 16, 0];
    let mut uv = [0u8; 16];
    interleave_chroma(&u, 4, &v, 4, &mut uv, 8, 3, 2);
    assert_eq!(&uv[..6], &[1, 11, 2, 12, 3, 13]);
    assert_eq!(&uv[8..14], &[4, 14, 5, 15, 6, 16]);
    assert_eq!(&uv[6..8], &[0, 0]);
}

#[test]
fn test_copy_plane_respects_strides() {
    let src = [1u8, 2, 9, 3, 4, 9];
    let mut dst = [0u8; 8];
    copy_plane(&src, 3, &mut dst, 4, 2, 2);
    assert_eq!(dst, [1, 2, 0, 0, 3, 4, 0, 0]);
}

#[test]
fn test_identity_copy_is_byte_identical() {
    let source = patterned_yuv420p(64, 48);
    let plan = ConversionPlan::resolve(
        &descriptor(Pixel::YUV420P, 64, 48),
        TargetFormat::Native,
        None,
        false,
    );
    let mut converter = FrameConverter::new(plan).unwrap();
    let converted = converter.convert(&source).unwrap();

    assert_eq!(converted.frame.format(), Pixel::YUV420P);
    for r in 0..48 {
        assert_eq!(row(converted.frame, 0, r, 64), row(&source, 0, r, 64));
    }
    for plane in 1..3 {
        for r in 0..24 {
            assert_eq!(row(converted.frame, plane, r, 32), row(&source, plane, r, 32));
        }
    }
}

#[test]
fn test_interleave_frame_to_nv12() {
    let source = patterned_yuv420p(64, 48);
    let plan = ConversionPlan::resolve(
        &descriptor(Pixel::YUV420P, 64, 48),
        TargetFormat::SemiPlanar,
        None,
        false,
    );
    let mut converter = FrameConverter::new(plan).unwrap();
    let converted = converter.convert(&source).unwrap();
    let out = converted.frame;

    assert_eq!(out.format(), Pixel::NV12);
    assert_eq!((out.width(), out.height()), (64, 48));
    assert_eq!(row(out, 0, 10, 64), row(&source, 0, 10, 64));

    let uv = row(out, 1, 5, 64);
    let u = row(&source, 1, 5, 32);
    let v = row(&source, 2, 5, 32);
    for x in 0..32 {
        assert_eq!(uv[2 * x], u[x]);
        assert_eq!(uv[2 * x + 1], v[x]);
    }
}

#[test]
fn test_scale_to_resize_target() {
    let source = patterned_yuv420p(320, 240);
    let plan = ConversionPlan::resolve(
        &descriptor(Pixel::YUV420P, 320, 240),
        TargetFormat::Native,
        Some((800, 600)),
        false,
    );
    let mut converter = FrameConverter::new(plan).unwrap();
    let converted = converter.convert(&source).unwrap();
    assert_eq!(converted.frame.width(), 800);
    assert_eq!(converted.frame.height(), 600);
    assert_eq!(converted.frame.format(), Pixel::YUV420P);
}

#[test]
fn test_accelerated_colorspace_on_host_frames_falls_back() {
    let source = patterned_yuv420p(64, 48);
    let plan = ConversionPlan::resolve(
        &descriptor(Pixel::YUV420P, 64, 48),
        TargetFormat::Bgr,
        None,
        true,
    );
    let mut converter = FrameConverter::new(plan).unwrap();
    for _ in 0..2 {
        let converted = converter.convert(&source).unwrap();
        assert_eq!(converted.frame.format(), Pixel::BGR24);
        assert_eq!((converted.frame.width(), converted.frame.height()), (64, 48));
    }
    assert!(converter.fallback_logged);
}

#[test]
fn test_empty_frame_is_rejected() {
    let plan = ConversionPlan::resolve(
        &descriptor(Pixel::YUV420P, 64, 48),
        TargetFormat::Native,
        None,
        false,
    );
    let mut converter = FrameConverter::new(plan).unwrap();
    assert!(converter.convert(&Video::empty()).is_err());
}

fn patterned_nv12(width: u32, height: u32) -> Video {
    let mut frame = Video::new(Pixel::NV12, width, height);
    for plane in 0..2 {
        let stride = frame.stride(plane);
        let rows = (if plane == 0 { height } else { height.div_ceil(2) }) as usize;
        let data = frame.data_mut(plane);
        for row in 0..rows {
            for col in 0..width as usize {
                data[row * stride + col] = ((row * 5 + col * 11 + plane * 70) % 253) as u8;
            }
        }
    }
    frame
}

#[test]
fn test_identity_follows_actual_frame_format() {
    // Decoder announced yuv420p but hands out NV12 frames.
    let source = patterned_nv12(64, 48);
    let plan = ConversionPlan::resolve(
        &descriptor(Pixel::YUV420P, 64, 48),
        TargetFormat::Native,
        None,
        false,
    );
    let mut converter = FrameConverter::new(plan).unwrap();

    for _ in 0..2 {
        let converted = converter.convert(&source).unwrap();
        assert_eq!(converted.frame.format(), Pixel::NV12);
        assert_eq!(row(converted.frame, 0, 7, 64), row(&source, 0, 7, 64));
        assert_eq!(row(converted.frame, 1, 3, 64), row(&source, 1, 3, 64));
    }
    assert_eq!(converter.plan().source, Geometry::new(Pixel::NV12, 64, 48));
    assert_eq!(converter.plan().strategy, ConversionStrategy::IdentityCopy);
}

#[test]
fn test_interleave_plan_becomes_copy_for_nv12_frames() {
    let source = patterned_nv12(64, 48);
    let plan = ConversionPlan::resolve(
        &descriptor(Pixel::YUV420P, 64, 48),
        TargetFormat::SemiPlanar,
        None,
        false,
    );
    let mut converter = FrameConverter::new(plan).unwrap();
    let converted = converter.convert(&source).unwrap();

    assert_eq!(converted.frame.format(), Pixel::NV12);
    assert_eq!(row(converted.frame, 1, 10, 64), row(&source, 1, 10, 64));
    assert_eq!(converter.plan().strategy, ConversionStrategy::IdentityCopy);
}

#[test]
fn test_rebase_keeps_resize_target() {
    let plan = ConversionPlan::resolve(
        &descriptor(Pixel::YUV420P, 320, 240),
        TargetFormat::Native,
        Some((800, 600)),
        false,
    );
    let rebased = plan.rebase(Geometry::new(Pixel::NV12, 640, 480));
    assert_eq!(rebased.strategy, ConversionStrategy::SoftwareScale);
    assert_eq!(rebased.target, Geometry::new(Pixel::NV12, 800, 600));
    assert!(rebased.resize);

    let source = patterned_nv12(640, 480);
    let mut converter = FrameConverter::new(plan).unwrap();
    let converted = converter.convert(&source).unwrap();
    assert_eq!((converted.frame.width(), converted.frame.height()), (800, 600));
}

#[test]
fn test_rebase_keeps_requested_format() {
    let plan = ConversionPlan::resolve(
        &descriptor(Pixel::YUV420P, 64, 48),
        TargetFormat::Bgr,
        None,
        true,
    );
    let rebased = plan.rebase(Geometry::new(Pixel::NV12, 64, 48));
    assert_eq!(rebased.target.format, Pixel::BGR24);
    assert_eq!(rebased.strategy, ConversionStrategy::SoftwareScale);
    assert!(rebased.accelerate);
}
