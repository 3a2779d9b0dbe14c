//! Recorded command batches.

use std::sync::Arc;

use rhal_core::pitch::{Extent, Origin};
use rhal_core::ResourceLifetimeManager;
use rhal_types::{HalError, HalResult, RefCountId, TextureRegion};
use tracing::error;

use crate::driver::{Command, TextureCopy};
use crate::resources::{Buffer, Claim, ResourceSet, Texture};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordingState {
    Initial,
    Recording,
    Ended,
}

/// A list of GPU commands recorded between `begin` and `end`.
///
/// Every resource a command touches is retained for as long as the
/// recording exists; a submitted batch takes its own claims, released
/// when the batch retires.
pub struct CommandList {
    device_id: u64,
    lifetime: Arc<ResourceLifetimeManager>,
    state: RecordingState,
    commands: Vec<Command>,
    retained: Vec<RefCountId>,
}

impl CommandList {
    pub(crate) fn new(device_id: u64, lifetime: Arc<ResourceLifetimeManager>) -> Self {
        Self {
            device_id,
            lifetime,
            state: RecordingState::Initial,
            commands: Vec::new(),
            retained: Vec::new(),
        }
    }

    /// Start a new recording, discarding the previous one.
    pub fn begin(&mut self) {
        self.release();
        self.commands.clear();
        self.state = RecordingState::Recording;
    }

    pub fn end(&mut self) -> HalResult<()> {
        if self.state != RecordingState::Recording {
            return Err(HalError::usage("end() without a matching begin()"));
        }
        self.state = RecordingState::Ended;
        Ok(())
    }

    pub fn is_ended(&self) -> bool {
        self.state == RecordingState::Ended
    }

    pub fn command_count(&self) -> usize {
        self.commands.len()
    }

    pub fn copy_buffer(
        &mut self,
        src: &Buffer,
        src_offset: u64,
        dst: &Buffer,
        dst_offset: u64,
        size: u64,
    ) -> HalResult<()> {
        self.check_recording()?;
        let in_bounds = |offset: u64, limit: u64| offset.checked_add(size).is_some_and(|end| end <= limit);
        if !in_bounds(src_offset, src.desc.size_in_bytes) || !in_bounds(dst_offset, dst.desc.size_in_bytes) {
            return Err(HalError::usage(format!(
                "copy of {} bytes out of bounds (src {}+{} of {}, dst {}+{} of {})",
                size,
                src_offset,
                size,
                src.desc.size_in_bytes,
                dst_offset,
                size,
                dst.desc.size_in_bytes
            )));
        }
        self.retain(&src.claim)?;
        self.retain(&dst.claim)?;
        self.commands.push(Command::CopyBuffer {
            src: src.claim.native,
            src_offset,
            dst: dst.claim.native,
            dst_offset,
            size,
        });
        Ok(())
    }

    /// Copy `src_region` of `src` to the same-sized box at `dst_origin` in
    /// mip `dst_mip` of layer `dst_layer` of `dst`.
    pub fn copy_texture(
        &mut self,
        src: &Texture,
        src_region: &TextureRegion,
        dst: &Texture,
        dst_origin: Origin,
        dst_mip: u32,
        dst_layer: u32,
    ) -> HalResult<()> {
        self.check_recording()?;
        if src.desc.format != dst.desc.format {
            return Err(HalError::usage(format!(
                "texture copy between {:?} and {:?}",
                src.desc.format, dst.desc.format
            )));
        }
        let dst_region = TextureRegion {
            x: dst_origin.x,
            y: dst_origin.y,
            z: dst_origin.z,
            mip_level: dst_mip,
            array_layer: dst_layer,
            ..*src_region
        };
        if !src_region.fits(&src.desc) || !dst_region.fits(&dst.desc) {
            return Err(HalError::usage("texture copy region out of bounds"));
        }
        if !src_region.is_block_aligned(&src.desc) || !dst_region.is_block_aligned(&dst.desc) {
            return Err(HalError::usage(format!(
                "texture copy region is not aligned to the blocks of {:?}",
                src.desc.format
            )));
        }
        self.retain(&src.claim)?;
        self.retain(&dst.claim)?;
        self.commands.push(Command::CopyTexture(TextureCopy {
            src: src.claim.native,
            src_origin: Origin::new(src_region.x, src_region.y, src_region.z),
            src_mip: src_region.mip_level,
            src_layer: src_region.array_layer,
            dst: dst.claim.native,
            dst_origin,
            dst_mip,
            dst_layer,
            extent: Extent::new(src_region.width, src_region.height, src_region.depth),
            format: src.desc.format,
        }));
        Ok(())
    }

    pub fn set_resource_set(&mut self, slot: u32, set: &ResourceSet) -> HalResult<()> {
        self.check_recording()?;
        self.retain(&set.claim)?;
        self.commands.push(Command::BindResourceSet {
            slot,
            set: set.claim.native,
        });
        Ok(())
    }

    /// Commands plus one fresh claim per retained object, handed to the
    /// batch being submitted.
    pub(crate) fn prepare_submission(&self, device_id: u64) -> HalResult<(Vec<Command>, Vec<RefCountId>)> {
        if device_id != self.device_id {
            return Err(HalError::usage("command list belongs to another device"));
        }
        if self.state != RecordingState::Ended {
            return Err(HalError::usage("command list submitted before end()"));
        }
        for (i, &id) in self.retained.iter().enumerate() {
            if let Err(e) = self.lifetime.increment(id) {
                // Roll back what this submission already took
                if let Err(rollback) = self.lifetime.decrement_all(&self.retained[..i]) {
                    error!("rolling back command list submission: {}", rollback);
                }
                return Err(e);
            }
        }
        Ok((self.commands.clone(), self.retained.clone()))
    }

    fn check_recording(&self) -> HalResult<()> {
        if self.state != RecordingState::Recording {
            return Err(HalError::usage("command recorded outside begin()/end()"));
        }
        Ok(())
    }

    fn retain(&mut self, claim: &Claim) -> HalResult<()> {
        if claim.device_id != self.device_id {
            return Err(HalError::usage(format!(
                "{:?} {} belongs to another device",
                claim.native.kind, claim.id
            )));
        }
        self.lifetime.increment(claim.id)?;
        self.retained.push(claim.id);
        Ok(())
    }

    fn release(&mut self) {
        let retained = std::mem::take(&mut self.retained);
        if let Err(e) = self.lifetime.decrement_all(&retained) {
            error!("releasing command list resources: {}", e);
        }
    }
}

impl Drop for CommandList {
    fn drop(&mut self) {
        self.release();
    }
}
