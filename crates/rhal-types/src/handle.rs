use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier handed out by the lifetime manager for every GPU-visible
/// object. Doubles as the resource identity used in mapping keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RefCountId(pub u32);

impl fmt::Display for RefCountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An opaque driver-side object handle.
/// Opaque to the core -- the driver assigns these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NativeHandle {
    /// Driver-unique object identifier
    pub raw: u64,
    /// Type tag for debugging and validation
    pub kind: ResourceKind,
}

/// Driver handle of a submitted command batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Buffer,
    Texture,
    Sampler,
    ResourceSet,
}

/// The native driver family a device runs on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    /// Immediate-context driver: synchronous execution, padded map pitches
    #[default]
    #[serde(rename = "immediate")]
    Immediate,
    /// Tiled command-buffer driver: persistently mapped buffers, staged texture uploads
    #[serde(rename = "tiled")]
    Tiled,
    /// Explicit low-level driver: host-visible memory only, manual lifetimes
    #[serde(rename = "explicit")]
    Explicit,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [
        BackendKind::Immediate,
        BackendKind::Tiled,
        BackendKind::Explicit,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Immediate => "immediate",
            BackendKind::Tiled => "tiled",
            BackendKind::Explicit => "explicit",
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "immediate" => Ok(BackendKind::Immediate),
            "tiled" => Ok(BackendKind::Tiled),
            "explicit" => Ok(BackendKind::Explicit),
            other => Err(format!("unknown backend '{}'", other)),
        }
    }
}
