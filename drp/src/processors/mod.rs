//! Built-in structural and I/O processors.

pub mod batching;
pub mod csv_log;
pub mod external;
pub mod load;
pub mod save;
pub mod select;

pub use batching::{batch_by_keys, debatch, GroupValue, ImageBatcher, ImageDebatcher};
pub use csv_log::CsvLog;
pub use external::{ExternalFn, ExternalStep, FrameFn, MapFrames};
pub use load::{ImageLoader, LoadMode};
pub use save::FrameSaver;
pub use select::ImageSelector;
