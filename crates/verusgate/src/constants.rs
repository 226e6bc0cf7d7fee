pub const NAME: &str = "Verus Gateway";
pub const BIN_NAME: &str = "verusgate";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const ABOUT: &str =
    "HTTP gateway serving files stored in shielded transactions on Verus chains";

/// Injected by the build environment; "unknown" for local builds.
pub const BUILD_TIME: Option<&str> = option_env!("VERUSGATE_BUILD_TIME");
pub const GIT_COMMIT: Option<&str> = option_env!("VERUSGATE_GIT_COMMIT");

/// Full version string for `--version`.
pub fn long_version() -> String {
    format!(
        "{VERSION}\nbuild time: {}\ngit commit: {}",
        BUILD_TIME.unwrap_or("unknown"),
        GIT_COMMIT.unwrap_or("unknown"),
    )
}
