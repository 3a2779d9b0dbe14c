//! Buffer and texture uploads.
//!
//! The path is picked per call from the resource's usage and the driver's
//! capabilities: CPU-writable resources go through map/copy/unmap, others
//! through the driver's direct update command, and textures on drivers
//! without one through a staging texture plus a GPU copy.

use rhal_core::pitch::{self, Extent, Origin, PitchLayout};
use rhal_types::{
    BufferUsage, HalError, HalResult, MapMode, SampleCount, TextureDescription, TextureRegion,
    TextureUsage,
};
use tracing::debug;

use crate::device::GraphicsDevice;
use crate::resources::{Buffer, Texture};

impl GraphicsDevice {
    /// Write `data` at `offset_bytes`. Empty data is a no-op.
    pub fn update_buffer(&self, buffer: &Buffer, offset_bytes: u64, data: &[u8]) -> HalResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.check_owner(&buffer.claim)?;
        let desc = buffer.desc;
        let end = offset_bytes
            .checked_add(data.len() as u64)
            .filter(|&end| end <= desc.size_in_bytes)
            .ok_or_else(|| {
                HalError::usage(format!(
                    "update {}+{} exceeds buffer of {} bytes",
                    offset_bytes,
                    data.len(),
                    desc.size_in_bytes
                ))
            })?;

        if desc.usage.is_cpu_writable() {
            if offset_bytes != 0 {
                return Err(HalError::usage(
                    "updates to dynamic or staging buffers must start at offset 0",
                ));
            }
            let mapped = self.map(buffer, MapMode::Write, 0)?;
            let written = self.write_mapped(&mapped, 0, data);
            let unmapped = self.unmap(buffer, 0);
            return written.and(unmapped);
        }

        let range = if desc.usage.contains(BufferUsage::UNIFORM) {
            if offset_bytes != 0 || end != desc.size_in_bytes {
                return Err(HalError::unsupported(format!(
                    "partial update ({}..{}) of a {}-byte uniform buffer",
                    offset_bytes, end, desc.size_in_bytes
                )));
            }
            None
        } else {
            Some(offset_bytes..end)
        };

        let _submission = self.shared.submission_lock.lock();
        self.shared.driver.update_buffer(buffer.native(), range, data)
    }

    /// Typed convenience over [`GraphicsDevice::update_buffer`].
    pub fn update_buffer_typed<T: bytemuck::Pod>(
        &self,
        buffer: &Buffer,
        offset_bytes: u64,
        data: &[T],
    ) -> HalResult<()> {
        self.update_buffer(buffer, offset_bytes, bytemuck::cast_slice(data))
    }

    /// Write densely packed texels into `region`. An empty region is a
    /// no-op; `data` must hold at least the region's dense size.
    pub fn update_texture(&self, texture: &Texture, data: &[u8], region: &TextureRegion) -> HalResult<()> {
        if region.is_empty() {
            return Ok(());
        }
        self.check_owner(&texture.claim)?;
        let desc = texture.desc;
        if !region.fits(&desc) {
            return Err(HalError::usage(format!(
                "region {}x{}x{} at ({}, {}, {}) mip {} layer {} is outside the texture",
                region.width,
                region.height,
                region.depth,
                region.x,
                region.y,
                region.z,
                region.mip_level,
                region.array_layer
            )));
        }

        if !region.is_block_aligned(&desc) {
            return Err(HalError::usage(format!(
                "region {}x{} at ({}, {}) does not cover whole {}x{} blocks of {:?}",
                region.width,
                region.height,
                region.x,
                region.y,
                desc.format.block_dim(),
                desc.format.block_dim(),
                desc.format
            )));
        }

        let format = desc.format;
        let extent = Extent::new(region.width, region.height, region.depth);
        let needed = pitch::region_size(extent, format)?;
        if (data.len() as u64) < needed {
            return Err(HalError::usage(format!(
                "region needs {} bytes of source data, got {}",
                needed,
                data.len()
            )));
        }
        let src_layout = PitchLayout::dense(region.width, region.height, format)?;

        if desc.usage.is_cpu_writable() {
            return self.update_mapped_texture(texture, data, region, src_layout);
        }

        if self.capabilities().direct_texture_updates {
            let _submission = self.shared.submission_lock.lock();
            return self
                .shared
                .driver
                .update_texture(texture.native(), region, data, src_layout);
        }

        self.update_texture_staged(texture, data, region)
    }

    /// Map the destination subresource and copy row by row into whatever
    /// pitch the driver reports.
    fn update_mapped_texture(
        &self,
        texture: &Texture,
        data: &[u8],
        region: &TextureRegion,
        src_layout: PitchLayout,
    ) -> HalResult<()> {
        let desc = texture.desc;
        let subresource = desc.subresource(region.mip_level, region.array_layer);
        let mapped = self.map(texture, MapMode::Write, subresource)?;

        let copied = self.shared.mapped.with_entry(&mapped.key, |entry| {
            let dst_layout = PitchLayout {
                row_pitch: entry.mapping.row_pitch,
                depth_pitch: entry.mapping.depth_pitch,
            };
            // Holding the table lock keeps the mapping alive for the copy
            let dst = unsafe {
                std::slice::from_raw_parts_mut(entry.mapping.ptr.as_ptr(), entry.mapping.size_in_bytes as usize)
            };
            pitch::copy_texture_region(
                data,
                Origin::ZERO,
                src_layout,
                dst,
                Origin::new(region.x, region.y, region.z),
                dst_layout,
                Extent::new(region.width, region.height, region.depth),
                desc.format,
            )
        });

        let unmapped = self.unmap(texture, subresource);
        copied.and(unmapped)
    }

    /// Fill a region-sized staging texture, then copy it over on the GPU.
    /// The staging texture is released here; the copy batch keeps it alive
    /// until it retires.
    fn update_texture_staged(&self, texture: &Texture, data: &[u8], region: &TextureRegion) -> HalResult<()> {
        let desc = texture.desc;
        let staging_desc = TextureDescription {
            width: region.width,
            height: region.height,
            depth: region.depth,
            mip_levels: 1,
            array_layers: 1,
            format: desc.format,
            usage: TextureUsage::STAGING,
            texture_type: desc.texture_type,
            sample_count: SampleCount::Count1,
        };
        let staging = self.create_texture(&staging_desc)?;
        let staging_region = TextureRegion {
            x: 0,
            y: 0,
            z: 0,
            mip_level: 0,
            array_layer: 0,
            ..*region
        };
        self.update_texture(&staging, data, &staging_region)?;

        let mut list = self.create_command_list();
        list.begin();
        list.copy_texture(
            &staging,
            &staging_region,
            texture,
            Origin::new(region.x, region.y, region.z),
            region.mip_level,
            region.array_layer,
        )?;
        list.end()?;
        self.submit_commands(&list, None)?;
        debug!(
            "staged {}x{}x{} texture update through {}",
            region.width,
            region.height,
            region.depth,
            staging.id()
        );
        Ok(())
    }
}
