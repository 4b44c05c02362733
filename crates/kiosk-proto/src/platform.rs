use std::path::PathBuf;

/// Directory for the user's config file.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("kiosk-panel")
}

/// Directory for logs and other runtime data.
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("kiosk-panel")
}
