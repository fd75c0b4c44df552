//! Crate-wide constants.

/// Application name, used for data directories and environment variable prefixes.
pub const APP_NAME: &str = "abiforge";

/// Length of the truncated hex digest used for step hashes and layer directories.
pub const OBJ_HASH_PREFIX_LEN: usize = 20;

/// Environment variable overriding the layer store location.
pub const STORE_ENV: &str = "ABIFORGE_STORE";

/// Environment variable exported to step commands, pointing at the working root.
pub const ROOT_ENV: &str = "ABIFORGE_ROOT";

/// Default environment variable read by the launcher.
pub const DEFAULT_PORT_ENV: &str = "PORT";

/// Port used by the launcher when the port variable is unset.
pub const DEFAULT_PORT: u16 = 10000;

/// Default bind host for the launcher.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Priority of ABI-sensitive packages that do not declare one.
pub const DEFAULT_PRIORITY: u32 = 1000;

/// Directory (relative to the image root) where auxiliary artifacts are placed.
pub const DEFAULT_ARTIFACTS_DIR: &str = "opt/artifacts";

/// Value of `SOURCE_DATE_EPOCH` given to step commands (1980-01-01, the ZIP epoch).
pub const SOURCE_DATE_EPOCH: &str = "315532800";
