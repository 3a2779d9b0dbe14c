pub mod config;
pub mod error;
pub mod fence;
pub mod lifetime;
pub mod mapped;
pub mod pitch;
pub mod submission;
pub mod wait_pool;

pub use fence::Fence;
pub use lifetime::ResourceLifetimeManager;
pub use mapped::{MappedResourceCache, MappingEntry, MappingKey, NativeMapping};
pub use submission::{CompletionSource, FenceSyncRegistry};
pub use wait_pool::WaitHandlePool;
