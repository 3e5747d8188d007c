//! Destination layout for finished downloads.
//!
//! Files land at
//! `{root}/{Artist}/{Album}/{NN} - {Title}.{ext}`, with every component
//! sanitized for the filesystem. Name collisions are resolved by the
//! coordinator with [`numbered`], which inserts ` (1)`, ` (2)`, ... before
//! the extension.

use std::path::{Path, PathBuf};

use crate::track::Track;

/// Longest name component, in characters.
pub const MAX_NAME_LENGTH: usize = 100;

/// Placeholder for names that sanitize to nothing.
const UNKNOWN: &str = "Unknown";

/// Suffix of files that are still being written.
const PARTIAL_EXTENSION: &str = "part";

/// Characters that are invalid in a file name on any common filesystem.
fn is_invalid(c: char) -> bool {
    matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') || c.is_control()
}

/// Makes `name` safe to use as a single path component.
///
/// * invalid characters become `_`
/// * the name is truncated to [`MAX_NAME_LENGTH`] characters
/// * leading whitespace and trailing dots and whitespace are trimmed
/// * an empty result becomes `Unknown`
///
/// Sanitizing is idempotent.
#[must_use]
pub fn sanitize(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| if is_invalid(c) { '_' } else { c })
        .take(MAX_NAME_LENGTH)
        .collect();

    let trimmed = replaced
        .trim_start_matches(char::is_whitespace)
        .trim_end_matches(|c: char| c == '.' || c.is_whitespace());

    if trimmed.is_empty() {
        UNKNOWN.to_owned()
    } else {
        trimmed.to_owned()
    }
}

/// Canonical destination of `track` under `root`.
#[must_use]
pub fn destination(root: &Path, track: &Track, extension: &str) -> PathBuf {
    let title = sanitize(&format!("{:02} - {}", track.track_number, track.title));
    root.join(sanitize(&track.artist))
        .join(sanitize(&track.album))
        .join(format!("{title}.{extension}"))
}

/// The `n`-th collision alternative of `path`; `n == 0` is `path` itself.
#[must_use]
pub fn numbered(path: &Path, n: usize) -> PathBuf {
    if n == 0 {
        return path.to_path_buf();
    }

    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(extension) => format!("{stem} ({n}).{}", extension.to_string_lossy()),
        None => format!("{stem} ({n})"),
    };
    path.with_file_name(name)
}

/// Where `path` is written before it is complete.
#[must_use]
pub fn partial(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(PARTIAL_EXTENSION);
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_and_trims() {
        assert_eq!(sanitize("AC/DC"), "AC_DC");
        assert_eq!(sanitize("What?  "), "What_");
        assert_eq!(sanitize("Vol. 2..."), "Vol. 2");
        assert_eq!(sanitize("  ..  "), "Unknown");
        assert_eq!(sanitize(""), "Unknown");
    }

    #[test]
    fn truncates_long_names() {
        let long = "x".repeat(300);
        assert_eq!(sanitize(&long).chars().count(), MAX_NAME_LENGTH);
    }

    #[test]
    fn sanitize_is_idempotent() {
        let alphabet: Vec<char> = "ab .:/\\?*\"<>|\t\n\u{a0}é日".chars().collect();
        for _ in 0..2_000 {
            let len = fastrand::usize(0..140);
            let name: String = (0..len)
                .map(|_| alphabet[fastrand::usize(..alphabet.len())])
                .collect();

            let once = sanitize(&name);
            assert_eq!(sanitize(&once), once, "input: {name:?}");
            assert!(!once.chars().any(is_invalid), "input: {name:?}");
            assert!(once.chars().count() <= MAX_NAME_LENGTH);
        }
    }

    #[test]
    fn canonical_layout() {
        let track = Track {
            title: "Title".to_owned(),
            artist: "Artist".to_owned(),
            album: "Album".to_owned(),
            track_number: 3,
            ..Track::default()
        };
        assert_eq!(
            destination(Path::new("/music"), &track, "flac"),
            PathBuf::from("/music/Artist/Album/03 - Title.flac")
        );
    }

    #[test]
    fn collision_suffix_goes_before_extension() {
        let path = Path::new("/music/A/B/03 - Title.flac");
        assert_eq!(numbered(path, 0), path);
        assert_eq!(
            numbered(path, 2),
            PathBuf::from("/music/A/B/03 - Title (2).flac")
        );
        assert_eq!(
            partial(path),
            PathBuf::from("/music/A/B/03 - Title.flac.part")
        );
    }
}
