//! Default configuration values

/// Build directory when none is given
pub const DEFAULT_BUILD_DIR: &str = "_build";

/// Cache directory under the build directory
pub const CACHE_SUBDIR: &str = "cache";

/// Release directory under the build directory
pub const RELEASE_SUBDIR: &str = "rel";

/// Build scratch directories under the build directory
pub const BUILD_SUBDIR: &str = "bld";

/// Shell used when `$SHELL` is unset
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// HTTP connect timeout (seconds)
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Control port of FTP origins without an explicit port
pub const FTP_PORT: u16 = 21;

/// Separator of package search paths in environment variables
pub const PATH_LIST_SEPARATOR: char = ':';
