//! Synchronous object validators.
//!
//! Each returns the first failing rule as a user-facing message. The
//! duplicate check against objects already in the bucket is asynchronous
//! and lives in the manager.

use std::path::{Component, Path};

use crate::config::UploadConfig;

/// Validates a leaf object name.
///
/// Rejects:
/// - Empty names
/// - Path separators (`/` or `\`)
/// - `.` and `..`
/// - Control characters
pub fn validate_object_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("Object name cannot be empty".into());
    }
    if name.chars().any(char::is_control) {
        return Err("Object name cannot contain control characters".into());
    }
    if name.contains('/') || name.contains('\\') {
        return Err("Object name cannot contain path separators".into());
    }
    if name == "." || name == ".." {
        return Err(format!("Object name cannot be \"{name}\""));
    }
    Ok(())
}

/// Validates a path relative to the dropped root.
///
/// Rejects absolute paths, parent traversal and empty segments.
pub fn validate_relative_path(rel: &str) -> Result<(), String> {
    let trimmed = rel.trim_end_matches('/');
    if trimmed.is_empty() {
        return Err("Folder path cannot be empty".into());
    }
    if trimmed.split('/').any(str::is_empty) {
        return Err(format!("Path contains an empty segment: {rel}"));
    }

    let path = Path::new(trimmed);
    if path.is_absolute() {
        return Err(format!("Absolute paths are not allowed: {rel}"));
    }
    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(format!("Parent directory traversal is not allowed: {rel}"));
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(format!("Absolute paths are not allowed: {rel}"));
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }
    Ok(())
}

/// Validates the full object path length.
pub fn validate_object_path(object_name: &str, config: &UploadConfig) -> Result<(), String> {
    if object_name.len() > config.max_name_len {
        return Err(format!(
            "Object path must be at most {} bytes",
            config.max_name_len
        ));
    }
    Ok(())
}

/// Validates the payload size. Folders must be empty placeholders.
pub fn validate_size(size: u64, is_folder: bool, config: &UploadConfig) -> Result<(), String> {
    if is_folder {
        if size != 0 {
            return Err("Folder placeholders must be empty".into());
        }
        return Ok(());
    }
    if size > config.max_object_size {
        return Err(format!(
            "File exceeds the maximum size of {} MiB",
            config.max_object_size / (1024 * 1024)
        ));
    }
    Ok(())
}
