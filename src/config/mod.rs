//! TOML configuration with environment variable overrides.
//!
//! Resolution order:
//!
//! 1. `PERSISTENT_SERIAL_CONFIG` (explicit path)
//! 2. `./persistent-serial.toml`
//! 3. `persistent-serial.toml` in the platform config directory
//! 4. built-in defaults
//!
//! Any value can then be overridden with `PERSISTENT_SERIAL_<SECTION>_<KEY>`,
//! for example `PERSISTENT_SERIAL_CONNECTION_BAUD_RATE=9600`.
//!
//! ```rust,ignore
//! use persistent_serial::config::ConfigLoader;
//!
//! let config = ConfigLoader::load()?.into_config();
//! println!("port: {}", config.connection.port);
//! ```

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{default_config_path, resolve_config_path, ConfigLoader};
pub use schema::{
    Config, ConnectionConfig, ListerConfig, LogFormat, LoggingConfig, DEFAULT_BAUD_RATE,
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_RECONNECT_INTERVAL_MS,
};
