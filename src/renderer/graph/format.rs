//! Stage Buffer Formats
//!
//! The closed set of buffer formats a stage may declare, and the table that
//! resolves each of them to a native texture format for a given capability
//! tier.
//!
//! ```text
//!  (BufferFormat, CapabilityTier) ──► FormatInfo { texture_format, layout, scalar, filterable }
//!   BufferFormat                  ──► AttachmentKind { Color | Depth | DepthStencil }
//! ```
//!
//! Three-channel formats are widened to four channels because wgpu exposes no
//! RGB render targets; the extra channel is ignored by shaders. 5-bit formats
//! resolve to 8-bit storage. On the [`Compat`](CapabilityTier::Compat) tier,
//! 32-bit float color formats fall back to their 16-bit variants.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::PipelineError;
use crate::renderer::core::context::CapabilityTier;

/// Tagged stage buffer format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BufferFormat {
    RgbInt8,
    RgbInt5,
    RgbInt10,
    RgbFloat16,
    RgbFloat32,
    SrgbInt8,
    RgbaInt8,
    RgbaInt5_1,
    RgbaInt10_2,
    RgbaFloat16,
    RgbaFloat32,
    SrgbaInt8,
    RInt8,
    RFloat16,
    RFloat32,
    RgInt8,
    RgFloat16,
    RgFloat32,
    Depth16,
    Depth24Stencil8,
    Depth32,
}

/// Channel layout as declared by the buffer format (before widening).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelLayout {
    R,
    Rg,
    Rgb,
    Rgba,
    Depth,
    DepthStencil,
}

/// Scalar storage type of a buffer format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    UnormInt,
    Float,
    Depth,
}

/// Where a buffer attaches on a render target, as a pure function of its format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentKind {
    Color,
    Depth,
    DepthStencil,
}

/// A concrete attachment point on an off-screen target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AttachmentPoint {
    Color(u8),
    Depth,
    DepthStencil,
}

impl fmt::Display for AttachmentPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Color(i) => write!(f, "COLOR_BUFFER{i}"),
            Self::Depth => f.write_str("DEPTH_BUFFER"),
            Self::DepthStencil => f.write_str("PACKED_DEPTH_STENCIL_BUFFER"),
        }
    }
}

/// Resolved native description of a [`BufferFormat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatInfo {
    pub texture_format: wgpu::TextureFormat,
    pub layout: ChannelLayout,
    pub scalar: ScalarType,
    /// Whether the native format supports linear filtering without extra features.
    pub filterable: bool,
}

impl FormatInfo {
    const fn new(
        texture_format: wgpu::TextureFormat,
        layout: ChannelLayout,
        scalar: ScalarType,
        filterable: bool,
    ) -> Self {
        Self {
            texture_format,
            layout,
            scalar,
            filterable,
        }
    }
}

// ============================================================================
// Lookup Table
// ============================================================================

use wgpu::TextureFormat as Tf;
use ChannelLayout as L;
use ScalarType as S;

/// `[format][tier]`, tier index 0 = `Full`, 1 = `Compat`.
const FORMAT_TABLE: [[FormatInfo; 2]; BufferFormat::COUNT] = [
    // RgbInt8
    [
        FormatInfo::new(Tf::Rgba8Unorm, L::Rgb, S::UnormInt, true),
        FormatInfo::new(Tf::Rgba8Unorm, L::Rgb, S::UnormInt, true),
    ],
    // RgbInt5
    [
        FormatInfo::new(Tf::Rgba8Unorm, L::Rgb, S::UnormInt, true),
        FormatInfo::new(Tf::Rgba8Unorm, L::Rgb, S::UnormInt, true),
    ],
    // RgbInt10
    [
        FormatInfo::new(Tf::Rgb10a2Unorm, L::Rgb, S::UnormInt, true),
        FormatInfo::new(Tf::Rgb10a2Unorm, L::Rgb, S::UnormInt, true),
    ],
    // RgbFloat16
    [
        FormatInfo::new(Tf::Rgba16Float, L::Rgb, S::Float, true),
        FormatInfo::new(Tf::Rgba16Float, L::Rgb, S::Float, true),
    ],
    // RgbFloat32
    [
        FormatInfo::new(Tf::Rgba32Float, L::Rgb, S::Float, false),
        FormatInfo::new(Tf::Rgba16Float, L::Rgb, S::Float, true),
    ],
    // SrgbInt8
    [
        FormatInfo::new(Tf::Rgba8UnormSrgb, L::Rgb, S::UnormInt, true),
        FormatInfo::new(Tf::Rgba8UnormSrgb, L::Rgb, S::UnormInt, true),
    ],
    // RgbaInt8
    [
        FormatInfo::new(Tf::Rgba8Unorm, L::Rgba, S::UnormInt, true),
        FormatInfo::new(Tf::Rgba8Unorm, L::Rgba, S::UnormInt, true),
    ],
    // RgbaInt5_1
    [
        FormatInfo::new(Tf::Rgba8Unorm, L::Rgba, S::UnormInt, true),
        FormatInfo::new(Tf::Rgba8Unorm, L::Rgba, S::UnormInt, true),
    ],
    // RgbaInt10_2
    [
        FormatInfo::new(Tf::Rgb10a2Unorm, L::Rgba, S::UnormInt, true),
        FormatInfo::new(Tf::Rgb10a2Unorm, L::Rgba, S::UnormInt, true),
    ],
    // RgbaFloat16
    [
        FormatInfo::new(Tf::Rgba16Float, L::Rgba, S::Float, true),
        FormatInfo::new(Tf::Rgba16Float, L::Rgba, S::Float, true),
    ],
    // RgbaFloat32
    [
        FormatInfo::new(Tf::Rgba32Float, L::Rgba, S::Float, false),
        FormatInfo::new(Tf::Rgba16Float, L::Rgba, S::Float, true),
    ],
    // SrgbaInt8
    [
        FormatInfo::new(Tf::Rgba8UnormSrgb, L::Rgba, S::UnormInt, true),
        FormatInfo::new(Tf::Rgba8UnormSrgb, L::Rgba, S::UnormInt, true),
    ],
    // RInt8
    [
        FormatInfo::new(Tf::R8Unorm, L::R, S::UnormInt, true),
        FormatInfo::new(Tf::R8Unorm, L::R, S::UnormInt, true),
    ],
    // RFloat16
    [
        FormatInfo::new(Tf::R16Float, L::R, S::Float, true),
        FormatInfo::new(Tf::R16Float, L::R, S::Float, true),
    ],
    // RFloat32
    [
        FormatInfo::new(Tf::R32Float, L::R, S::Float, false),
        FormatInfo::new(Tf::R16Float, L::R, S::Float, true),
    ],
    // RgInt8
    [
        FormatInfo::new(Tf::Rg8Unorm, L::Rg, S::UnormInt, true),
        FormatInfo::new(Tf::Rg8Unorm, L::Rg, S::UnormInt, true),
    ],
    // RgFloat16
    [
        FormatInfo::new(Tf::Rg16Float, L::Rg, S::Float, true),
        FormatInfo::new(Tf::Rg16Float, L::Rg, S::Float, true),
    ],
    // RgFloat32
    [
        FormatInfo::new(Tf::Rg32Float, L::Rg, S::Float, false),
        FormatInfo::new(Tf::Rg16Float, L::Rg, S::Float, true),
    ],
    // Depth16
    [
        FormatInfo::new(Tf::Depth16Unorm, L::Depth, S::Depth, false),
        FormatInfo::new(Tf::Depth16Unorm, L::Depth, S::Depth, false),
    ],
    // Depth24Stencil8
    [
        FormatInfo::new(Tf::Depth24PlusStencil8, L::DepthStencil, S::Depth, false),
        FormatInfo::new(Tf::Depth24PlusStencil8, L::DepthStencil, S::Depth, false),
    ],
    // Depth32
    [
        FormatInfo::new(Tf::Depth32Float, L::Depth, S::Depth, false),
        FormatInfo::new(Tf::Depth32Float, L::Depth, S::Depth, false),
    ],
];

impl BufferFormat {
    /// Number of format tags.
    pub const COUNT: usize = 21;

    /// Every format, in declaration order.
    pub const ALL: [BufferFormat; Self::COUNT] = [
        Self::RgbInt8,
        Self::RgbInt5,
        Self::RgbInt10,
        Self::RgbFloat16,
        Self::RgbFloat32,
        Self::SrgbInt8,
        Self::RgbaInt8,
        Self::RgbaInt5_1,
        Self::RgbaInt10_2,
        Self::RgbaFloat16,
        Self::RgbaFloat32,
        Self::SrgbaInt8,
        Self::RInt8,
        Self::RFloat16,
        Self::RFloat32,
        Self::RgInt8,
        Self::RgFloat16,
        Self::RgFloat32,
        Self::Depth16,
        Self::Depth24Stencil8,
        Self::Depth32,
    ];

    /// Resolves the native description for a capability tier.
    #[inline]
    #[must_use]
    pub const fn info(self, tier: CapabilityTier) -> FormatInfo {
        let t = match tier {
            CapabilityTier::Full => 0,
            CapabilityTier::Compat => 1,
        };
        FORMAT_TABLE[self as usize][t]
    }

    /// Attachment kind of this format.
    ///
    /// `Depth16` and `Depth32` attach as plain depth, `Depth24Stencil8` as the
    /// packed depth-stencil attachment, everything else as color.
    #[inline]
    #[must_use]
    pub const fn attachment_kind(self) -> AttachmentKind {
        match self {
            Self::Depth16 | Self::Depth32 => AttachmentKind::Depth,
            Self::Depth24Stencil8 => AttachmentKind::DepthStencil,
            _ => AttachmentKind::Color,
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_depth(self) -> bool {
        !matches!(self.attachment_kind(), AttachmentKind::Color)
    }

    /// Bytes per texel of the resolved native format.
    #[must_use]
    pub fn bytes_per_texel(self, tier: CapabilityTier) -> u32 {
        self.info(tier)
            .texture_format
            .block_copy_size(None)
            .unwrap_or(4)
    }

    /// The canonical tag name, e.g. `"DEPTH24_STENCIL8"`.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::RgbInt8 => "RGB_INT8",
            Self::RgbInt5 => "RGB_INT5",
            Self::RgbInt10 => "RGB_INT10",
            Self::RgbFloat16 => "RGB_FLOAT16",
            Self::RgbFloat32 => "RGB_FLOAT32",
            Self::SrgbInt8 => "SRGB_INT8",
            Self::RgbaInt8 => "RGBA_INT8",
            Self::RgbaInt5_1 => "RGBA_INT5_1",
            Self::RgbaInt10_2 => "RGBA_INT10_2",
            Self::RgbaFloat16 => "RGBA_FLOAT16",
            Self::RgbaFloat32 => "RGBA_FLOAT32",
            Self::SrgbaInt8 => "SRGBA_INT8",
            Self::RInt8 => "R_INT8",
            Self::RFloat16 => "R_FLOAT16",
            Self::RFloat32 => "R_FLOAT32",
            Self::RgInt8 => "RG_INT8",
            Self::RgFloat16 => "RG_FLOAT16",
            Self::RgFloat32 => "RG_FLOAT32",
            Self::Depth16 => "DEPTH16",
            Self::Depth24Stencil8 => "DEPTH24_STENCIL8",
            Self::Depth32 => "DEPTH32",
        }
    }
}

impl fmt::Display for BufferFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BufferFormat {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| PipelineError::UnknownFormat(s.to_string()))
    }
}

// ============================================================================
// Attachment Assignment
// ============================================================================

/// Assigns attachment points to an ordered list of buffer formats.
///
/// Color buffers take `Color(0)`, `Color(1)`, … in order of appearance among
/// color buffers. Depth-like buffers take the depth or packed depth-stencil
/// point; when several are declared the last one owns the point and earlier
/// ones are reported as `None`.
#[must_use]
pub fn assign_attachment_points(formats: &[BufferFormat]) -> Vec<Option<AttachmentPoint>> {
    let mut points = Vec::with_capacity(formats.len());
    let mut next_color: u8 = 0;
    let mut last_depth: Option<usize> = None;

    for (i, format) in formats.iter().enumerate() {
        let point = match format.attachment_kind() {
            AttachmentKind::Color => {
                let p = AttachmentPoint::Color(next_color);
                next_color = next_color.saturating_add(1);
                p
            }
            AttachmentKind::Depth => AttachmentPoint::Depth,
            AttachmentKind::DepthStencil => AttachmentPoint::DepthStencil,
        };
        if !matches!(point, AttachmentPoint::Color(_)) {
            if let Some(prev) = last_depth.replace(i) {
                log::warn!(
                    "Buffer #{prev} ({}) is shadowed by later depth buffer #{i} ({format})",
                    formats[prev]
                );
                points[prev] = None;
            }
        }
        points.push(Some(point));
    }
    points
}
