//! Row/slice pitch arithmetic and sub-resource region copies.
//!
//! Compressed formats are handled in whole blocks: a row of blocks covers
//! `block_dim` texel rows, and a region whose width or height is not a
//! multiple of the block size still occupies at least one block.

use rhal_types::{HalError, HalResult, PixelFormat};

/// Texel coordinate inside a subresource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Origin {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Origin {
    pub const ZERO: Origin = Origin { x: 0, y: 0, z: 0 };

    pub fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }
}

/// Size of a copy region in texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Extent {
    pub fn new(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.depth == 0
    }
}

/// Byte strides of a CPU-visible image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PitchLayout {
    pub row_pitch: u32,
    pub depth_pitch: u32,
}

impl PitchLayout {
    /// Tightly packed layout of a `width x height` image.
    pub fn dense(width: u32, height: u32, format: PixelFormat) -> HalResult<Self> {
        let row_pitch = row_pitch(width, format)?;
        Ok(Self {
            row_pitch,
            depth_pitch: depth_pitch(row_pitch, height, format)?,
        })
    }

    /// Layout with rows padded up to `alignment` bytes (a power of two).
    pub fn aligned(width: u32, height: u32, format: PixelFormat, alignment: u32) -> HalResult<Self> {
        let dense = row_pitch(width, format)?;
        let row_pitch = align_up(dense, alignment.max(1))?;
        Ok(Self {
            row_pitch,
            depth_pitch: depth_pitch(row_pitch, height, format)?,
        })
    }
}

fn blocks(texels: u32, block_dim: u32) -> u32 {
    texels.div_ceil(block_dim).max(1)
}

/// Pitches are stored as `u32`; anything wider cannot be laid out.
fn narrow(bytes: u64) -> HalResult<u32> {
    u32::try_from(bytes).map_err(|_| HalError::OutOfMemory { requested: bytes })
}

fn align_up(value: u32, alignment: u32) -> HalResult<u32> {
    narrow(value.div_ceil(alignment) as u64 * alignment as u64)
}

/// Bytes in one row of blocks covering `width` texels.
pub fn row_pitch(width: u32, format: PixelFormat) -> HalResult<u32> {
    narrow(blocks(width, format.block_dim()) as u64 * format.bytes_per_block() as u64)
}

/// Bytes in one depth slice given its row pitch.
pub fn depth_pitch(row_pitch: u32, height: u32, format: PixelFormat) -> HalResult<u32> {
    narrow(row_pitch as u64 * block_rows(height, format) as u64)
}

/// Number of block rows covering `height` texels.
pub fn block_rows(height: u32, format: PixelFormat) -> u32 {
    blocks(height, format.block_dim())
}

/// Dense byte size of a `width x height x depth` region.
pub fn region_size(extent: Extent, format: PixelFormat) -> HalResult<u64> {
    if extent.is_empty() {
        return Ok(0);
    }
    let layout = PitchLayout::dense(extent.width, extent.height, format)?;
    Ok(layout.depth_pitch as u64 * extent.depth as u64)
}

/// Byte offset of the block containing `origin`.
pub fn texel_offset(origin: Origin, layout: PitchLayout, format: PixelFormat) -> u64 {
    let block_dim = format.block_dim();
    origin.z as u64 * layout.depth_pitch as u64
        + (origin.y / block_dim) as u64 * layout.row_pitch as u64
        + (origin.x / block_dim) as u64 * format.bytes_per_block() as u64
}

fn check_block_origin(origin: Origin, format: PixelFormat) -> HalResult<()> {
    let block_dim = format.block_dim();
    if origin.x % block_dim != 0 || origin.y % block_dim != 0 {
        return Err(HalError::usage(format!(
            "origin ({}, {}) is not aligned to the {}x{} blocks of {:?}",
            origin.x, origin.y, block_dim, block_dim, format
        )));
    }
    Ok(())
}

/// Copy a region between two CPU images with independent pitches.
///
/// Falls back to a row-by-row (and slice-by-slice) copy whenever the two
/// layouts differ; bytes of `dst` outside the region are never touched.
/// Both origins must sit on a block boundary.
pub fn copy_texture_region(
    src: &[u8],
    src_origin: Origin,
    src_layout: PitchLayout,
    dst: &mut [u8],
    dst_origin: Origin,
    dst_layout: PitchLayout,
    extent: Extent,
    format: PixelFormat,
) -> HalResult<()> {
    if extent.is_empty() {
        return Ok(());
    }

    check_block_origin(src_origin, format)?;
    check_block_origin(dst_origin, format)?;

    let row_bytes = row_pitch(extent.width, format)? as usize;
    let rows = block_rows(extent.height, format) as usize;
    if row_bytes > src_layout.row_pitch as usize || row_bytes > dst_layout.row_pitch as usize {
        return Err(HalError::usage(format!(
            "row of {} bytes exceeds pitch (src {}, dst {})",
            row_bytes, src_layout.row_pitch, dst_layout.row_pitch
        )));
    }

    let src_base = texel_offset(src_origin, src_layout, format) as usize;
    let dst_base = texel_offset(dst_origin, dst_layout, format) as usize;

    let slice_bytes = rows * row_bytes;
    let contiguous = src_layout.row_pitch as usize == row_bytes
        && dst_layout.row_pitch as usize == row_bytes
        && (extent.depth == 1
            || (src_layout.depth_pitch as usize == slice_bytes
                && dst_layout.depth_pitch as usize == slice_bytes));

    if contiguous {
        let len = slice_bytes * extent.depth as usize;
        return copy_span(src, src_base, dst, dst_base, len);
    }

    for z in 0..extent.depth as usize {
        for row in 0..rows {
            let src_offset =
                src_base + z * src_layout.depth_pitch as usize + row * src_layout.row_pitch as usize;
            let dst_offset =
                dst_base + z * dst_layout.depth_pitch as usize + row * dst_layout.row_pitch as usize;
            copy_span(src, src_offset, dst, dst_offset, row_bytes)?;
        }
    }
    Ok(())
}

fn copy_span(src: &[u8], src_offset: usize, dst: &mut [u8], dst_offset: usize, len: usize) -> HalResult<()> {
    let from = src
        .get(src_offset..src_offset + len)
        .ok_or_else(|| {
            HalError::usage(format!(
                "source range {}..{} exceeds {} bytes",
                src_offset,
                src_offset + len,
                src.len()
            ))
        })?;
    let dst_len = dst.len();
    let to = dst
        .get_mut(dst_offset..dst_offset + len)
        .ok_or_else(|| {
            HalError::usage(format!(
                "destination range {}..{} exceeds {} bytes",
                dst_offset,
                dst_offset + len,
                dst_len
            ))
        })?;
    to.copy_from_slice(from);
    Ok(())
}
