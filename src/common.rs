//! 通用模块，包含配置与工具函数

pub mod config;
pub mod utils;

pub use self::config::{ConfigFile, ConfigManager, KeySource, KeyStoreConfig, TransportConfig};
pub use self::utils::ZeroizingVec;
