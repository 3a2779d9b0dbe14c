use serde::{Deserialize, Serialize};

use crate::format::{PixelFormat, SampleCount};
use crate::usage::{BufferUsage, TextureUsage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDescription {
    pub size_in_bytes: u64,
    pub usage: BufferUsage,
}

impl BufferDescription {
    pub fn new(size_in_bytes: u64, usage: BufferUsage) -> Self {
        Self {
            size_in_bytes,
            usage,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureType {
    Texture1D,
    Texture2D,
    Texture3D,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDescription {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub format: PixelFormat,
    pub usage: TextureUsage,
    pub texture_type: TextureType,
    pub sample_count: SampleCount,
}

impl TextureDescription {
    pub fn texture_2d(
        width: u32,
        height: u32,
        mip_levels: u32,
        array_layers: u32,
        format: PixelFormat,
        usage: TextureUsage,
    ) -> Self {
        Self {
            width,
            height,
            depth: 1,
            mip_levels,
            array_layers,
            format,
            usage,
            texture_type: TextureType::Texture2D,
            sample_count: SampleCount::Count1,
        }
    }

    pub fn texture_3d(
        width: u32,
        height: u32,
        depth: u32,
        mip_levels: u32,
        format: PixelFormat,
        usage: TextureUsage,
    ) -> Self {
        Self {
            width,
            height,
            depth,
            mip_levels,
            array_layers: 1,
            format,
            usage,
            texture_type: TextureType::Texture3D,
            sample_count: SampleCount::Count1,
        }
    }

    /// Flat subresource index of a mip level within an array layer.
    pub fn subresource(&self, mip_level: u32, array_layer: u32) -> u32 {
        mip_level + array_layer * self.mip_levels
    }

    /// Inverse of [`TextureDescription::subresource`].
    pub fn mip_and_layer(&self, subresource: u32) -> (u32, u32) {
        let mips = self.mip_levels.max(1);
        (subresource % mips, subresource / mips)
    }

    pub fn subresource_count(&self) -> u32 {
        self.mip_levels * self.array_layers
    }

    /// Dimensions of a mip level; each halves per level and never drops below 1.
    pub fn mip_dimensions(&self, mip_level: u32) -> (u32, u32, u32) {
        let shrink = |d: u32| d.checked_shr(mip_level).unwrap_or(0).max(1);
        (shrink(self.width), shrink(self.height), shrink(self.depth))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SamplerFilter {
    Point,
    #[default]
    Linear,
    Anisotropic,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SamplerAddressMode {
    #[default]
    Wrap,
    Mirror,
    Clamp,
    Border,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SamplerDescription {
    pub filter: SamplerFilter,
    pub address_mode: SamplerAddressMode,
    pub max_anisotropy: u32,
}

/// A box inside one texture subresource, in texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureRegion {
    pub x: u32,
    pub y: u32,
    pub z: u32,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_level: u32,
    pub array_layer: u32,
}

impl TextureRegion {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.depth == 0
    }

    /// Whether the region fits inside the given mip level of `desc`.
    pub fn fits(&self, desc: &TextureDescription) -> bool {
        if self.mip_level >= desc.mip_levels || self.array_layer >= desc.array_layers {
            return false;
        }
        let (w, h, d) = desc.mip_dimensions(self.mip_level);
        let within = |origin: u32, extent: u32, limit: u32| {
            origin
                .checked_add(extent)
                .map_or(false, |end| end <= limit)
        };
        within(self.x, self.width, w) && within(self.y, self.height, h) && within(self.z, self.depth, d)
    }

    /// Whether the region covers whole blocks of `desc.format`: the origin
    /// sits on a block boundary and each extent is a block multiple unless
    /// it runs to the edge of the mip level. Always true for 1x1 blocks.
    pub fn is_block_aligned(&self, desc: &TextureDescription) -> bool {
        let block = desc.format.block_dim();
        if block == 1 {
            return true;
        }
        let (w, h, _) = desc.mip_dimensions(self.mip_level);
        let covers = |origin: u32, extent: u32, limit: u32| {
            origin % block == 0 && (extent % block == 0 || origin.saturating_add(extent) == limit)
        };
        covers(self.x, self.width, w) && covers(self.y, self.height, h)
    }
}
