#![doc = include_str!("../README.md")]

pub mod context;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod host;
pub mod image_info;
pub mod mapper;
pub mod mapping;
pub mod preprocess;
pub mod storage;
pub mod tensor;
pub mod tensor_info;
pub mod types;

pub use context::{BaseContext, Context, ContextId, ContextRef, MapperRegistry};
pub use error::{MemError, Result};
pub use frame::{Frame, FrameRef};
pub use geometry::{GeometryPlan, Rect, Size, TransformRecord, plan_geometry};
pub use host::{HostContext, HostViewMapper};
pub use mapper::{MapperEndpoints, MapperRef, MemoryMapper};
pub use mapping::{MapperCache, MapperChain, create_mapper, map_frame, map_tensor};
pub use preprocess::{CropMode, PreprocessConfig, ResizeMode};
pub use tensor::{OffsetAlign, Tensor, TensorRef};
pub use tensor_info::{FrameInfo, TensorInfo};
pub use types::{AccessMode, DataType, Fourcc, Handle, ImageFormat, MediaType, MemoryType, Scalar};
