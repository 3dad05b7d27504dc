//! Device data types.

pub mod device;
pub mod device_table;

pub use device::{device_message, DeviceKey, SensorRecord};
pub use device_table::DeviceTable;
