//! Wire-format configuration and row encoding.

mod encoder;
mod format;

pub use encoder::RowEncoder;
pub use format::{Format, FormatConfig};
