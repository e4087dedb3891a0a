//! CLI command implementations.
//!
//! | Module     | Commands handled |
//! |------------|------------------|
//! | `init`     | `Init`           |
//! | `plan`     | `Plan`           |
//! | `validate` | `Validate`       |
//! | `run`      | `Run`            |

pub mod init;
pub mod plan;
pub mod run;
pub mod validate;

pub use init::cmd_init;
pub use plan::cmd_plan;
pub use run::{RunOptions, cmd_run};
pub use validate::cmd_validate;

use anyhow::Result;
use weekly_merge::config::MergeConfig;

use super::Cli;

/// Effective configuration for the global `--config` / `--verbose` flags.
pub fn load_config(cli: &Cli) -> Result<MergeConfig> {
    MergeConfig::load(cli.config.as_deref(), cli.verbose)
}
