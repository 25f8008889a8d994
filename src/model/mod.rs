pub mod batch;
pub mod device;
pub mod log;

pub use batch::LogBatch;
pub use device::DeviceInfo;
pub use log::{target_key, LogRecord, Persistence};
