//! Unified configuration system.
//!
//! Consolidates configuration from tiers with field-by-field YAML merging:
//! 1. **Defaults** - `Config::default()`
//! 2. **Project** - `$CWD/agentflow/config.yaml`
//! 3. **User** - `~/.agentflow/config.yaml`
//! 4. **Environment** - the variables below
//!
//! ## Environment Variables
//! - `AGENTFLOW_CONFIG_PATH` - Explicit config file (overrides the file tiers)
//! - `AGENTFLOW_DB_PATH` - Database path
//! - `AGENTFLOW_PORT` - HTTP port
//! - `AGENTFLOW_WEBHOOK_URL` - Chat webhook for notifications
//! - `AGENTFLOW_USER_DIR` - User config dir (default: `~/.agentflow`)
//! - `AGENTFLOW_PROJECT_DIR` - Project config dir (default: `./agentflow`)
//!
//! The vault key itself is read from the variable named by `vault.key_env`
//! (default `AGENTFLOW_ENCRYPTION_KEY`) and never stored in config.

mod loader;
mod merge;
mod types;

pub use loader::{ConfigLoader, ConfigPaths, ConfigTier};
pub use merge::{deep_merge, deep_merge_all};
pub use types::*;
