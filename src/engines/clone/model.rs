use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use super::CloneError;

/// Languages the multilingual engine accepts.
pub const MULTILINGUAL_LANGUAGES: &[&str] = &[
    "en", "es", "fr", "de", "it", "pt", "pl", "tr", "ru", "nl", "cs", "ar", "zh-cn", "ja", "hu",
    "ko",
];

/// Map a language tag onto [`MULTILINGUAL_LANGUAGES`].
///
/// Any Chinese variant becomes `zh-cn`; unknown or unsupported languages
/// fall back to `en`.
pub fn map_multilingual_language(language: Option<&str>) -> &'static str {
    let Some(tag) = language.map(|l| l.trim().to_ascii_lowercase()) else {
        return "en";
    };
    if tag.starts_with("zh") {
        return "zh-cn";
    }
    let primary = tag.split(['-', '_']).next().unwrap_or_default();
    MULTILINGUAL_LANGUAGES
        .iter()
        .find(|code| **code == primary)
        .copied()
        .unwrap_or("en")
}

/// SHA-256 of a reference recording's contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self::from_digest(Sha256::digest(bytes).as_slice())
    }

    fn from_digest(digest: &[u8]) -> Self {
        let mut out = [0u8; 32];
        out.copy_from_slice(digest);
        Self(out)
    }

    /// Hash a file in chunks on the blocking pool.
    pub async fn of_file(path: &Path) -> Result<Self, CloneError> {
        let path: PathBuf = path.to_path_buf();
        tokio::task::spawn_blocking(move || hash_file(&path))
            .await
            .map_err(|e| CloneError::Speaker(format!("fingerprint task failed: {e}")))?
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

fn hash_file(path: &Path) -> Result<Fingerprint, CloneError> {
    let io_err = |e: std::io::Error| {
        CloneError::Speaker(format!("cannot read {}: {e}", path.display()))
    };
    let mut file = std::fs::File::open(path).map_err(io_err)?;
    let mut hasher = Sha256::new();
    let mut chunk = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut chunk).map_err(io_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&chunk[..n]);
    }
    Ok(Fingerprint::from_digest(hasher.finalize().as_slice()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chinese_variants_map_to_simplified() {
        assert_eq!(map_multilingual_language(Some("zh")), "zh-cn");
        assert_eq!(map_multilingual_language(Some("zh-TW")), "zh-cn");
    }

    #[test]
    fn unsupported_languages_fall_back_to_english() {
        assert_eq!(map_multilingual_language(Some("sv")), "en");
        assert_eq!(map_multilingual_language(None), "en");
        assert_eq!(map_multilingual_language(Some("pt-BR")), "pt");
    }

    #[tokio::test]
    async fn file_fingerprint_matches_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ref.wav");
        std::fs::write(&path, b"reference").unwrap();
        let fp = Fingerprint::of_file(&path).await.unwrap();
        assert_eq!(fp, Fingerprint::of_bytes(b"reference"));
        assert_eq!(fp.to_string().len(), 64);
    }

    #[tokio::test]
    async fn missing_file_is_a_speaker_error() {
        let err = Fingerprint::of_file(Path::new("/nonexistent/ref.wav"))
            .await
            .unwrap_err();
        assert!(matches!(err, CloneError::Speaker(_)));
    }
}
