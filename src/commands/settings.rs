//! Enhancement options persisted as JSON

use std::fs;
use std::path::Path;

use crate::audio_clean::EnhanceOptions;
use crate::error::EnhanceError;

/// Load options from `path`, falling back to defaults when the file is
/// missing or cannot be parsed.
pub fn load_options(path: &Path) -> EnhanceOptions {
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<EnhanceOptions>(&content) {
            Ok(options) => options,
            Err(e) => {
                log::warn!("Failed to parse options in {}, using defaults: {}", path.display(), e);
                EnhanceOptions::default()
            }
        },
        Err(e) => {
            log::warn!("Could not read options from {}, using defaults: {}", path.display(), e);
            EnhanceOptions::default()
        }
    }
}

/// Write options to `path` as pretty JSON, creating parent directories.
pub fn save_options(path: &Path, options: &EnhanceOptions) -> Result<(), EnhanceError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let content = serde_json::to_string_pretty(options)?;
    fs::write(path, content)?;

    log::info!("Saved options to {}", path.display());
    Ok(())
}
