use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// How a buffer will be used.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const VERTEX = 1 << 0;
        const INDEX = 1 << 1;
        /// Small constant block; drivers may refuse partial updates.
        const UNIFORM = 1 << 2;
        const STRUCTURED_READ_ONLY = 1 << 3;
        const STRUCTURED_READ_WRITE = 1 << 4;
        const INDIRECT = 1 << 5;
        /// Rewritten from the CPU every frame.
        const DYNAMIC = 1 << 6;
        /// CPU-side transfer buffer.
        const STAGING = 1 << 7;
    }
}

impl BufferUsage {
    /// Updates to such buffers go through map/copy/unmap.
    pub fn is_cpu_writable(&self) -> bool {
        self.intersects(BufferUsage::DYNAMIC | BufferUsage::STAGING)
    }
}

bitflags! {
    /// How a texture will be used.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const SAMPLED = 1 << 0;
        const STORAGE = 1 << 1;
        const RENDER_TARGET = 1 << 2;
        const DEPTH_STENCIL = 1 << 3;
        /// CPU-side transfer texture; the only mappable kind.
        const STAGING = 1 << 4;
    }
}

impl TextureUsage {
    pub fn is_cpu_writable(&self) -> bool {
        self.contains(TextureUsage::STAGING)
    }
}

/// Access requested when mapping a resource into CPU memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MapMode {
    Read,
    Write,
    ReadWrite,
}

impl MapMode {
    pub fn can_read(&self) -> bool {
        matches!(self, MapMode::Read | MapMode::ReadWrite)
    }

    pub fn can_write(&self) -> bool {
        matches!(self, MapMode::Write | MapMode::ReadWrite)
    }
}
