mod build;
mod inspect;
mod plan;
mod run;

pub use build::{BuildArgs, cmd_build};
pub use inspect::cmd_inspect;
pub use plan::cmd_plan;
pub use run::cmd_run;
