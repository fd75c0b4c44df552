mod build;
mod cache;
mod launch;
mod plan;

pub use build::cmd_build;
pub use cache::{cmd_cache_list, cmd_cache_prune};
pub use launch::cmd_launch;
pub use plan::cmd_plan;
