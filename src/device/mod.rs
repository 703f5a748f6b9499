pub mod buffer;
pub mod task;

pub use buffer::{BufferSnapshot, RollingBuffer};
pub use task::{DeviceTask, LatestSample, Sampler, SnapshotSource, TaskState};
