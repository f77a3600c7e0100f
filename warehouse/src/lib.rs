pub mod core;
pub mod loader;
pub mod mart;
pub mod staging;
pub mod tables;

#[cfg(test)]
mod testutil;

pub use self::core::{MART, RAW, STAGING, Warehouse, WriteMode};
pub use self::loader::RawLoader;
pub use self::mart::MartTransformer;
pub use self::staging::StagingTransformer;
