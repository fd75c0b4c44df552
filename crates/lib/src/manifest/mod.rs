//! Build manifest types and loading.
//!
//! Manifests are read once from a TOML or JSON file and never mutated while a
//! build runs; the planner derives the ordered build steps from them.

mod load;
mod types;

pub use load::{ManifestError, load_manifest, parse_manifest};
pub use types::*;
