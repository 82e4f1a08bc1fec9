//! Typed path wrapper and filename utilities (component A: Path & Fingerprint
//! Utilities). Grounded on the teacher's `ffui_core::engine::os_paths` /
//! `output_policy_paths` normalisation helpers, generalised from "ffmpeg
//! output path" to a general-purpose absolute path handle.

use std::path::{Component, Path, PathBuf};

use rand::Rng;
use rand::distributions::{Distribution, Uniform};

use crate::error::{ClopError, ClopResult};

/// A validated absolute, normalised path. Derived accessors never touch the
/// filesystem except [`FilePath::exists`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FilePath(PathBuf);

impl FilePath {
    /// Normalise and make absolute. Fails with `InvalidPath` on an empty
    /// string or a path that resolves to an illegal segment sequence.
    pub fn from_str(raw: &str) -> ClopResult<Self> {
        if raw.trim().is_empty() {
            return Err(ClopError::InvalidPath("empty path".into()));
        }
        Self::from_path(Path::new(raw))
    }

    pub fn from_path(raw: &Path) -> ClopResult<Self> {
        let absolute = if raw.is_absolute() {
            raw.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(ClopError::Io)?
                .join(raw)
        };
        let normalised = normalise(&absolute);
        if normalised.as_os_str().is_empty() {
            return Err(ClopError::InvalidPath(raw.display().to_string()));
        }
        Ok(Self(normalised))
    }

    pub fn value(&self) -> &Path {
        &self.0
    }

    pub fn parent(&self) -> Option<FilePath> {
        self.0.parent().map(|p| Self(p.to_path_buf()))
    }

    pub fn stem(&self) -> Option<&str> {
        self.0.file_stem().and_then(|s| s.to_str())
    }

    pub fn extension(&self) -> Option<String> {
        self.0
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_ascii_lowercase())
    }

    pub fn with_file_name(&self, name: &str) -> FilePath {
        Self(self.0.with_file_name(name))
    }

    /// Only accessor permitted to touch the filesystem.
    pub fn exists(&self) -> bool {
        self.0.exists()
    }

    /// Allocate a path inside the process temp area, guaranteeing uniqueness
    /// when `unique` is requested (a random suffix keeps concurrent workers
    /// from colliding on the same stem).
    pub fn temp_file(prefix: &str, extension: &str, unique: bool) -> FilePath {
        let dir = std::env::temp_dir().join("clop");
        let name = if unique {
            format!("{prefix}-{}.{extension}", nano_id(ALPHANUMERIC, 12))
        } else {
            format!("{prefix}.{extension}")
        };
        Self(dir.join(name))
    }
}

impl std::fmt::Display for FilePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Lexically normalise `..`/`.` components without touching the filesystem
/// (no symlink resolution — callers that need canonical paths call
/// `std::fs::canonicalize` explicitly at the IO boundary).
fn normalise(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if !matches!(out.components().next_back(), None | Some(Component::RootDir)) {
                    out.pop();
                }
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Platform-reserved characters replaced with `_`; everything else is left
/// untouched so non-ASCII filenames survive round-trips.
const RESERVED_CHARS: &[char] = &[':', '?', '/', '\\', '*', '|', '"', '<', '>'];

pub fn safe_filename(s: &str) -> String {
    s.chars()
        .map(|c| if RESERVED_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

/// Expand a destination-name template: `%f` -> stem, `%i` -> zero-padded
/// counter. The source extension is always preserved and `counter` is
/// incremented by the caller between invocations.
pub fn filepath_generator(template: &str, source: &FilePath, counter: u32) -> ClopResult<FilePath> {
    let stem = source.stem().unwrap_or("file");
    let ext = source.extension().unwrap_or_default();
    let expanded = template
        .replace("%f", stem)
        .replace("%i", &format!("{counter:03}"));
    let parent = source.parent().unwrap_or_else(|| FilePath(PathBuf::from(".")));
    let filename = safe_filename(&format!("{expanded}.{ext}"));
    Ok(parent.with_file_name(&filename))
}

const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Uniform random identifier of exact length `size`, drawn from `alphabet`.
pub fn nano_id(alphabet: &[u8], size: usize) -> String {
    let dist = Uniform::from(0..alphabet.len());
    let mut rng = rand::thread_rng();
    (0..size)
        .map(|_| alphabet[dist.sample(&mut rng)] as char)
        .collect()
}

pub fn nano_id_default(size: usize) -> String {
    nano_id(ALPHANUMERIC, size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_filename_replaces_reserved_chars_only() {
        assert_eq!(safe_filename("a:b?c/d\\e*f|g\"h<i>j"), "a_b_c_d_e_f_g_h_i_j");
        assert_eq!(safe_filename("héllo.jpg"), "héllo.jpg");
    }

    #[test]
    fn from_str_rejects_empty() {
        assert!(FilePath::from_str("").is_err());
        assert!(FilePath::from_str("   ").is_err());
    }

    #[test]
    fn normalise_collapses_parent_dirs() {
        let p = FilePath::from_str("/a/b/../c/./d").unwrap();
        assert_eq!(p.value(), Path::new("/a/c/d"));
    }

    #[test]
    fn nano_id_has_exact_length() {
        assert_eq!(nano_id_default(21).chars().count(), 21);
    }

    #[test]
    fn filepath_generator_expands_template_and_keeps_extension() {
        let src = FilePath::from_str("/tmp/clop/photo.jpeg").unwrap();
        let out = filepath_generator("%f-%i", &src, 3).unwrap();
        assert_eq!(out.value().file_name().unwrap().to_str().unwrap(), "photo-003.jpeg");
    }
}
