pub mod config;
pub mod domain;
pub mod infrastructure;

/// Returns the NewsPulse user agent string with the current version
///
/// Format: "NewsPulse/X.Y.Z"
///
/// The version is read from Cargo.toml at compile time, ensuring it's
/// always in sync with the package version.
pub fn user_agent() -> String {
    format!("NewsPulse/{}", env!("CARGO_PKG_VERSION"))
}
