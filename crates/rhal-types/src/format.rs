use serde::{Deserialize, Serialize};

/// Texel formats understood by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    R8Unorm,
    R8G8Snorm,
    R16Unorm,
    R32Float,
    R8G8B8A8Unorm,
    B8G8R8A8Unorm,
    R32G32B32A32Float,
    R32G32B32A32UInt,
    Bc1RgbUnorm,
    Bc1RgbaUnorm,
    Bc2Unorm,
    Bc3Unorm,
    D24UnormS8UInt,
    D32FloatS8UInt,
}

impl PixelFormat {
    /// Edge length in texels of one compression block (1 for uncompressed formats).
    pub fn block_dim(&self) -> u32 {
        if self.is_compressed() {
            4
        } else {
            1
        }
    }

    /// Bytes occupied by one block; for uncompressed formats, one texel.
    pub fn bytes_per_block(&self) -> u32 {
        match self {
            PixelFormat::R8Unorm => 1,
            PixelFormat::R8G8Snorm | PixelFormat::R16Unorm => 2,
            PixelFormat::R32Float
            | PixelFormat::R8G8B8A8Unorm
            | PixelFormat::B8G8R8A8Unorm
            | PixelFormat::D24UnormS8UInt => 4,
            PixelFormat::D32FloatS8UInt => 8,
            PixelFormat::R32G32B32A32Float | PixelFormat::R32G32B32A32UInt => 16,
            PixelFormat::Bc1RgbUnorm | PixelFormat::Bc1RgbaUnorm => 8,
            PixelFormat::Bc2Unorm | PixelFormat::Bc3Unorm => 16,
        }
    }

    pub fn is_compressed(&self) -> bool {
        matches!(
            self,
            PixelFormat::Bc1RgbUnorm
                | PixelFormat::Bc1RgbaUnorm
                | PixelFormat::Bc2Unorm
                | PixelFormat::Bc3Unorm
        )
    }

    pub fn is_depth_stencil(&self) -> bool {
        matches!(self, PixelFormat::D24UnormS8UInt | PixelFormat::D32FloatS8UInt)
    }
}

impl std::str::FromStr for PixelFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let format = match s.to_ascii_lowercase().as_str() {
            "r8unorm" => PixelFormat::R8Unorm,
            "r8g8snorm" => PixelFormat::R8G8Snorm,
            "r16unorm" => PixelFormat::R16Unorm,
            "r32float" => PixelFormat::R32Float,
            "r8g8b8a8unorm" | "rgba8" => PixelFormat::R8G8B8A8Unorm,
            "b8g8r8a8unorm" | "bgra8" => PixelFormat::B8G8R8A8Unorm,
            "r32g32b32a32float" | "rgba32f" => PixelFormat::R32G32B32A32Float,
            "r32g32b32a32uint" => PixelFormat::R32G32B32A32UInt,
            "bc1rgbunorm" | "bc1" => PixelFormat::Bc1RgbUnorm,
            "bc1rgbaunorm" => PixelFormat::Bc1RgbaUnorm,
            "bc2unorm" | "bc2" => PixelFormat::Bc2Unorm,
            "bc3unorm" | "bc3" => PixelFormat::Bc3Unorm,
            "d24unorms8uint" => PixelFormat::D24UnormS8UInt,
            "d32floats8uint" => PixelFormat::D32FloatS8UInt,
            other => return Err(format!("unknown pixel format '{}'", other)),
        };
        Ok(format)
    }
}

/// Multisample count of a texture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SampleCount {
    #[default]
    Count1,
    Count2,
    Count4,
    Count8,
    Count16,
    Count32,
}

impl SampleCount {
    /// Candidates probed by capability queries, highest first.
    pub const DESCENDING: [SampleCount; 5] = [
        SampleCount::Count32,
        SampleCount::Count16,
        SampleCount::Count8,
        SampleCount::Count4,
        SampleCount::Count2,
    ];

    pub fn as_u32(&self) -> u32 {
        match self {
            SampleCount::Count1 => 1,
            SampleCount::Count2 => 2,
            SampleCount::Count4 => 4,
            SampleCount::Count8 => 8,
            SampleCount::Count16 => 16,
            SampleCount::Count32 => 32,
        }
    }
}
