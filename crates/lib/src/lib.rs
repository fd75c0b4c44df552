//! abiforge-lib: build orchestration for images with ABI-sensitive packages
//!
//! This crate provides the pieces of the abiforge build:
//! - `manifest`: declarative package, artifact and base environment description
//! - `plan`: ordering of packages into hashed build steps
//! - `cache`: content-addressed filesystem layers keyed by step hash
//! - `execute`: sandboxed step execution against a working root
//! - `fetch`: retrieval of auxiliary artifacts
//! - `pipeline`: the end-to-end build producing an image
//! - `launch`: runtime port resolution and worker start

pub mod cache;
pub mod consts;
pub mod execute;
pub mod fetch;
pub mod launch;
pub mod manifest;
pub mod pipeline;
pub mod placeholder;
pub mod plan;
pub mod platform;
pub mod store_lock;
pub mod util;
