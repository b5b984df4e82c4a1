//! stagehand-lib: multi-stage image assembly and provisioning.
//!
//! A recipe declares named stages that either consume a pinned external
//! artifact or build on an earlier stage, an ordered list of provisioning
//! steps, and the runtime defaults of the produced image:
//! - `resolve`: validates the stage graph and produces a deterministic plan
//! - `execute`: realizes each stage's filesystem
//! - `provision`: runs ordered, precondition-checked steps on the target
//! - `finalize`: fixes the search path, volumes and default command
//! - `pipeline`: drives a build from declaration to a published `Image`

pub mod consts;
pub mod execute;
pub mod finalize;
pub mod image;
pub mod pipeline;
pub mod platform;
pub mod provision;
pub mod recipe;
pub mod resolve;
pub mod source;
pub mod util;
