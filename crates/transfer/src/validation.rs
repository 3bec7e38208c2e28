use std::path::{Component, Path};

use tracklift_protocol::AUDIO_EXTENSION;

use crate::TransferError;

/// Validates that an object path stays inside its storage root.
///
/// Rejects:
/// - Empty paths
/// - Absolute paths (Unix `/` or Windows `C:\`)
/// - Parent directory traversal (`..`)
/// - Windows prefix components (`C:`, `\\server`)
pub fn validate_object_path(object_path: &str) -> Result<(), TransferError> {
    if object_path.is_empty() {
        return Err(TransferError::InvalidPath("empty path".into()));
    }

    let path = Path::new(object_path);

    if path.is_absolute() || object_path.starts_with('\\') {
        return Err(TransferError::InvalidPath(format!(
            "absolute path not allowed: {object_path}"
        )));
    }

    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(TransferError::InvalidPath(format!(
                    "parent directory traversal not allowed: {object_path}"
                )));
            }
            Component::Prefix(_) => {
                return Err(TransferError::InvalidPath(format!(
                    "path prefix not allowed: {object_path}"
                )));
            }
            Component::RootDir => {
                return Err(TransferError::InvalidPath(format!(
                    "absolute path not allowed: {object_path}"
                )));
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }

    Ok(())
}

/// Validates a track file name supplied by a client.
///
/// A track name is a single path component: no separators, no leading
/// dot, no control characters. The extension is checked separately by
/// [`has_audio_extension`].
pub fn validate_track_name(name: &str) -> Result<(), TransferError> {
    if name.trim().is_empty() {
        return Err(TransferError::InvalidPath("file name is required".into()));
    }
    // Also covers `.` and `..`. Dot-prefixed names are reserved by storage.
    if name.starts_with('.') {
        return Err(TransferError::InvalidPath(format!(
            "file name must not start with a dot: {name}"
        )));
    }
    if name.contains(['/', '\\']) {
        return Err(TransferError::InvalidPath(format!(
            "file name must not contain path separators: {name}"
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(TransferError::InvalidPath(
            "file name must not contain control characters".into(),
        ));
    }
    // Windows drive prefix (`C:foo.wav`).
    if name.len() >= 2 && name.as_bytes()[1] == b':' {
        return Err(TransferError::InvalidPath(format!(
            "drive prefix not allowed: {name}"
        )));
    }

    if !has_audio_extension(name) {
        return Err(TransferError::InvalidFileType(format!(
            "only .{AUDIO_EXTENSION} files are accepted: {name}"
        )));
    }

    Ok(())
}

/// Returns `true` if `name` ends with the accepted audio extension
/// (case-insensitive).
pub fn has_audio_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(AUDIO_EXTENSION))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_path_rejects_empty() {
        assert!(validate_object_path("").is_err());
    }

    #[test]
    fn object_path_rejects_parent_dir_traversal() {
        assert!(validate_object_path("../../../etc/passwd").is_err());
        assert!(validate_object_path("tracks/../../escape").is_err());
    }

    #[test]
    fn object_path_rejects_absolute() {
        assert!(validate_object_path("/tmp/malicious").is_err());
    }

    #[test]
    fn object_path_accepts_prefixed_key() {
        assert!(validate_object_path("tracks/take1.wav").is_ok());
        assert!(validate_object_path("./tracks/take1.wav").is_ok());
    }

    #[test]
    fn track_name_accepts_wav() {
        assert!(validate_track_name("Bass DI - take 3.wav").is_ok());
        assert!(validate_track_name("VOX.WAV").is_ok());
    }

    #[test]
    fn track_name_requires_audio_extension() {
        assert!(matches!(
            validate_track_name("notes.txt"),
            Err(TransferError::InvalidFileType(_))
        ));
        assert!(matches!(
            validate_track_name("wav"),
            Err(TransferError::InvalidFileType(_))
        ));
    }

    #[test]
    fn track_name_rejects_blank() {
        assert!(matches!(
            validate_track_name("   "),
            Err(TransferError::InvalidPath(_))
        ));
    }

    #[test]
    fn track_name_rejects_separators() {
        assert!(validate_track_name("sub/take.wav").is_err());
        assert!(validate_track_name("..\\take.wav").is_err());
    }

    #[test]
    fn track_name_rejects_leading_dot() {
        for name in [".take.wav", ".wav", ".", ".."] {
            assert!(
                matches!(validate_track_name(name), Err(TransferError::InvalidPath(_))),
                "{name}"
            );
        }
        assert!(validate_track_name("take.1.wav").is_ok());
    }

    #[test]
    fn track_name_rejects_drive_prefix_and_control_chars() {
        assert!(validate_track_name("C:take.wav").is_err());
        assert!(validate_track_name("take\n.wav").is_err());
    }

    #[test]
    fn audio_extension_check() {
        assert!(has_audio_extension("a.wav"));
        assert!(has_audio_extension("a.Wav"));
        assert!(!has_audio_extension("a.wav.mp3"));
        assert!(!has_audio_extension("a"));
    }
}
