//! Host memory backing software driver objects.

use std::alloc::Layout;
use std::ptr::NonNull;

use rhal_core::pitch::{self, Extent, Origin, PitchLayout};
use rhal_types::{BufferDescription, HalError, HalResult, TextureDescription};

const ALLOCATION_ALIGN: usize = 16;

/// A zeroed heap block that stays put until dropped, so pointers handed
/// out by `map` remain valid while the object lives.
pub(crate) struct HostAllocation {
    ptr: NonNull<u8>,
    len: usize,
    layout: Layout,
}

// Only raw bytes live here; concurrent access is the mapping contract's
// concern, same as driver-visible memory.
unsafe impl Send for HostAllocation {}
unsafe impl Sync for HostAllocation {}

impl HostAllocation {
    pub(crate) fn zeroed(len: u64) -> HalResult<Self> {
        let len = usize::try_from(len).map_err(|_| HalError::OutOfMemory { requested: len })?;
        let layout = Layout::from_size_align(len.max(1), ALLOCATION_ALIGN)
            .map_err(|_| HalError::OutOfMemory { requested: len as u64 })?;
        let raw = unsafe { std::alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(HalError::OutOfMemory { requested: len as u64 })?;
        Ok(Self { ptr, len, layout })
    }

    pub(crate) fn ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn read(&self, offset: u64, out: &mut [u8]) -> HalResult<()> {
        let start = self.checked_range(offset, out.len())?;
        unsafe {
            std::ptr::copy_nonoverlapping(self.ptr.as_ptr().add(start), out.as_mut_ptr(), out.len());
        }
        Ok(())
    }

    pub(crate) fn write(&self, offset: u64, data: &[u8]) -> HalResult<()> {
        let start = self.checked_range(offset, data.len())?;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.as_ptr().add(start), data.len());
        }
        Ok(())
    }

    /// Copy the whole allocation out.
    pub(crate) fn snapshot(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.len];
        unsafe {
            std::ptr::copy_nonoverlapping(self.ptr.as_ptr(), bytes.as_mut_ptr(), self.len);
        }
        bytes
    }

    /// Run `f` over the allocation as a mutable slice.
    ///
    /// # Safety
    /// The caller must ensure no CPU mapping of this memory is being
    /// accessed concurrently.
    pub(crate) unsafe fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let bytes = unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) };
        f(bytes)
    }

    fn checked_range(&self, offset: u64, len: usize) -> HalResult<usize> {
        let start = usize::try_from(offset).map_err(|_| HalError::usage("offset out of range"))?;
        match start.checked_add(len) {
            Some(end) if end <= self.len => Ok(start),
            _ => Err(HalError::usage(format!(
                "range {}..{} exceeds allocation of {} bytes",
                offset,
                offset.saturating_add(len as u64),
                self.len
            ))),
        }
    }
}

impl Drop for HostAllocation {
    fn drop(&mut self) {
        unsafe { std::alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

pub(crate) struct SoftBuffer {
    pub(crate) desc: BufferDescription,
    pub(crate) memory: HostAllocation,
}

impl SoftBuffer {
    pub(crate) fn new(desc: BufferDescription) -> HalResult<Self> {
        Ok(Self {
            desc,
            memory: HostAllocation::zeroed(desc.size_in_bytes)?,
        })
    }
}

/// One mip level of one array layer.
pub(crate) struct SoftSubresource {
    pub(crate) layout: PitchLayout,
    pub(crate) memory: HostAllocation,
}

pub(crate) struct SoftTexture {
    pub(crate) desc: TextureDescription,
    pub(crate) subresources: Vec<SoftSubresource>,
}

impl SoftTexture {
    /// Staging textures get rows padded to `row_alignment`; everything
    /// else is stored densely.
    pub(crate) fn new(desc: TextureDescription, row_alignment: u32) -> HalResult<Self> {
        if desc.width == 0 || desc.height == 0 || desc.depth == 0 {
            return Err(HalError::usage("texture dimensions must be non-zero"));
        }
        if desc.mip_levels == 0 || desc.array_layers == 0 {
            return Err(HalError::usage("texture needs at least one mip level and layer"));
        }

        let padded = desc.usage.is_cpu_writable();
        let mut subresources = Vec::with_capacity(desc.subresource_count() as usize);
        for _layer in 0..desc.array_layers {
            for mip in 0..desc.mip_levels {
                let (width, height, depth) = desc.mip_dimensions(mip);
                let layout = if padded {
                    PitchLayout::aligned(width, height, desc.format, row_alignment)?
                } else {
                    PitchLayout::dense(width, height, desc.format)?
                };
                let size = layout.depth_pitch as u64 * depth as u64;
                subresources.push(SoftSubresource {
                    layout,
                    memory: HostAllocation::zeroed(size)?,
                });
            }
        }
        Ok(Self { desc, subresources })
    }

    pub(crate) fn subresource(&self, mip_level: u32, array_layer: u32) -> HalResult<&SoftSubresource> {
        if mip_level >= self.desc.mip_levels || array_layer >= self.desc.array_layers {
            return Err(HalError::usage(format!(
                "subresource (mip {}, layer {}) out of range",
                mip_level, array_layer
            )));
        }
        self.subresource_at(self.desc.subresource(mip_level, array_layer))
    }

    pub(crate) fn subresource_at(&self, index: u32) -> HalResult<&SoftSubresource> {
        self.subresources
            .get(index as usize)
            .ok_or_else(|| HalError::usage(format!("subresource {} out of range", index)))
    }

    /// Copy `extent` texels at `origin` out of a subresource into a
    /// densely packed vector.
    pub(crate) fn read_region(
        &self,
        mip_level: u32,
        array_layer: u32,
        origin: Origin,
        extent: Extent,
    ) -> HalResult<Vec<u8>> {
        let sub = self.subresource(mip_level, array_layer)?;
        let format = self.desc.format;
        let dense = PitchLayout::dense(extent.width, extent.height, format)?;
        let mut out = vec![0u8; pitch::region_size(extent, format)? as usize];
        let src = sub.memory.snapshot();
        pitch::copy_texture_region(&src, origin, sub.layout, &mut out, Origin::ZERO, dense, extent, format)?;
        Ok(out)
    }

    /// Write `data`, laid out as `src_layout`, into a subresource region.
    pub(crate) fn write_region(
        &self,
        mip_level: u32,
        array_layer: u32,
        origin: Origin,
        extent: Extent,
        data: &[u8],
        src_layout: PitchLayout,
    ) -> HalResult<()> {
        let sub = self.subresource(mip_level, array_layer)?;
        let format = self.desc.format;
        unsafe {
            sub.memory.with_bytes_mut(|dst| {
                pitch::copy_texture_region(data, Origin::ZERO, src_layout, dst, origin, sub.layout, extent, format)
            })
        }
    }
}
