//! Format Table Tests
//!
//! Tests for:
//! - Tag parsing and canonical names
//! - Native format resolution per capability tier
//! - Attachment point assignment for mixed buffer lists

use myth_deferred::renderer::core::context::CapabilityTier;
use myth_deferred::renderer::graph::format::{assign_attachment_points, AttachmentPoint, BufferFormat};
use myth_deferred::PipelineError;

// ============================================================================
// Parsing
// ============================================================================

#[test]
fn tags_parse_case_insensitively() {
    assert_eq!("rgba_float16".parse::<BufferFormat>().unwrap(), BufferFormat::RgbaFloat16);
    assert_eq!("Depth24_Stencil8".parse::<BufferFormat>().unwrap(), BufferFormat::Depth24Stencil8);
    assert_eq!("R_INT8".parse::<BufferFormat>().unwrap(), BufferFormat::RInt8);
}

#[test]
fn unknown_tag_is_reported_by_name() {
    match "RGB_FLOAT64".parse::<BufferFormat>() {
        Err(PipelineError::UnknownFormat(tag)) => assert_eq!(tag, "RGB_FLOAT64"),
        other => panic!("expected UnknownFormat, got {other:?}"),
    }
}

#[test]
fn display_uses_canonical_names() {
    assert_eq!(BufferFormat::RgbaInt10_2.to_string(), "RGBA_INT10_2");
    assert_eq!(BufferFormat::SrgbInt8.to_string(), "SRGB_INT8");
    assert_eq!(BufferFormat::ALL.len(), BufferFormat::COUNT);
}

// ============================================================================
// Resolution
// ============================================================================

#[test]
fn depth_formats_resolve_to_depth_textures() {
    let tier = CapabilityTier::Full;
    assert_eq!(BufferFormat::Depth16.info(tier).texture_format, wgpu::TextureFormat::Depth16Unorm);
    assert_eq!(
        BufferFormat::Depth24Stencil8.info(tier).texture_format,
        wgpu::TextureFormat::Depth24PlusStencil8
    );
    assert_eq!(BufferFormat::Depth32.info(tier).texture_format, wgpu::TextureFormat::Depth32Float);
    for f in BufferFormat::ALL {
        assert_eq!(f.is_depth(), f.info(tier).texture_format.is_depth_stencil_format(), "{f}");
    }
}

#[test]
fn rgb_formats_are_padded_to_four_channels() {
    let tier = CapabilityTier::Full;
    assert_eq!(BufferFormat::RgbInt8.info(tier).texture_format, wgpu::TextureFormat::Rgba8Unorm);
    assert_eq!(BufferFormat::RgbFloat16.info(tier).texture_format, wgpu::TextureFormat::Rgba16Float);
    assert_eq!(BufferFormat::SrgbInt8.info(tier).texture_format, wgpu::TextureFormat::Rgba8UnormSrgb);
}

#[test]
fn compat_tier_never_resolves_to_32_bit_float_color() {
    for f in BufferFormat::ALL {
        let native = f.info(CapabilityTier::Compat).texture_format;
        assert!(
            !matches!(
                native,
                wgpu::TextureFormat::R32Float | wgpu::TextureFormat::Rg32Float | wgpu::TextureFormat::Rgba32Float
            ),
            "{f} resolves to {native:?} on the compat tier"
        );
    }
    assert_eq!(BufferFormat::RgbaFloat32.bytes_per_texel(CapabilityTier::Full), 16);
    assert_eq!(BufferFormat::RgbaFloat32.bytes_per_texel(CapabilityTier::Compat), 8);
}

// ============================================================================
// Attachment Points
// ============================================================================

#[test]
fn color_buffers_are_numbered_in_order() {
    let points = assign_attachment_points(&[
        BufferFormat::RgbaInt8,
        BufferFormat::Depth24Stencil8,
        BufferFormat::RgbFloat16,
        BufferFormat::RInt8,
    ]);
    assert_eq!(
        points,
        vec![
            Some(AttachmentPoint::Color(0)),
            Some(AttachmentPoint::DepthStencil),
            Some(AttachmentPoint::Color(1)),
            Some(AttachmentPoint::Color(2)),
        ]
    );
}

#[test]
fn last_depth_buffer_owns_the_depth_point() {
    let points = assign_attachment_points(&[
        BufferFormat::Depth16,
        BufferFormat::RgbInt8,
        BufferFormat::Depth32,
    ]);
    assert_eq!(
        points,
        vec![None, Some(AttachmentPoint::Color(0)), Some(AttachmentPoint::Depth)]
    );
}

#[test]
fn attachment_points_display_like_their_slots() {
    assert_eq!(AttachmentPoint::Color(3).to_string(), "COLOR_BUFFER3");
    assert_eq!(AttachmentPoint::Depth.to_string(), "DEPTH_BUFFER");
    assert_eq!(AttachmentPoint::DepthStencil.to_string(), "PACKED_DEPTH_STENCIL_BUFFER");
}
