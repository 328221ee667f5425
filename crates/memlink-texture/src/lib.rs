#![doc = include_str!("../README.md")]

pub mod completion;
pub mod context;
pub mod device;
pub mod driver;
pub mod lock;
pub mod mappers;
pub mod processor;
pub mod software;
pub mod staging;

pub use completion::{CompletionPolicy, poll_until_complete};
pub use context::{ConvertTarget, DmaContext, TextureContext};
pub use device::{DeviceConfig, TextureDevice};
pub use driver::{
    BltParams, FenceId, MappedPlane, ProcessorId, ProcessorKey, TextureDesc, TextureDriver,
    TextureFormat, TextureId, TextureUsage, check_status,
};
pub use lock::{DeviceGuard, DeviceLock, MutexDeviceLock};
pub use mappers::{
    DMA_HANDLE, DmaToTextureMapper, HostToTextureMapper, PLANE_HANDLE, TEXTURE_HANDLE,
    TextureResource, TextureToDmaMapper, TextureToHostMapper,
};
pub use processor::ProcessorCache;
pub use software::{SharedHandleTable, SoftwareDriver};
pub use staging::{PoolStats, StagingKey, StagingPool, StagingTexture};
