pub mod data;
pub mod io;
pub mod printing;

pub use data::{builtin_providers, path_display, Config, ProviderConfig};
pub use io::ConfigError;
