pub mod data;
pub mod io;


pub use data::{resolve_api_key, Config, ValueError};
pub use io::ConfigError;
