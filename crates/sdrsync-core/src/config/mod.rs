//! Settings persistence
//!
//! ```ignore
//! use sdrsync_core::config::{default_config_path, SyncSettings};
//!
//! let path = default_config_path();
//! let settings = SyncSettings::load(&path);
//! // ...
//! settings.save(&path)?;
//! ```

mod io;
mod paths;
mod settings;

pub use io::{load_config, save_config};
pub use paths::{default_config_path, default_recording_dir};
pub use settings::{ChannelState, SessionState, SyncSettings};
