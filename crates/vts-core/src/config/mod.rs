mod dirs;
mod settings;

pub use dirs::Directories;
pub use settings::{Config, EndpointConfig, Timings};
