use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::RwLock;

use super::builtin::{builtin_profiles, nearest_builtin, normalize_language};
use super::classify::VoiceClassifier;
use super::{Gender, ProfileError, VoiceProfile, PARAM_NOTES, PARAM_REFERENCE_AUDIO};
use crate::BackendKind;

/// Input for [`VoiceProfileStore::create_cloned`].
#[derive(Debug, Clone, Default)]
pub struct CloneProfileRequest {
    /// Display name; the voice id is derived from it.
    pub name: String,
    /// Recording of the speaker to clone (a few seconds of clean speech).
    pub reference_audio: PathBuf,
    /// Known language, skips detection when set.
    pub language: Option<String>,
    /// Known gender, skips detection when set.
    pub gender: Option<Gender>,
    /// Text used to detect the language when none was given.
    pub sample_text: Option<String>,
    pub notes: Option<String>,
}

/// Metadata edits; `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct MetadataUpdate {
    pub name: Option<String>,
    /// `Some(None)` clears the language.
    pub language: Option<Option<String>>,
    pub gender: Option<Gender>,
    pub notes: Option<String>,
}

/// Voice id → profile, with the built-in catalog pre-seeded.
///
/// Custom profiles are written to `<dir>/<voice_id>.json` when the store was
/// opened on a directory. Reads take a shared lock; create and delete are
/// atomic with respect to each other.
pub struct VoiceProfileStore {
    profiles: RwLock<BTreeMap<String, VoiceProfile>>,
    dir: Option<PathBuf>,
}

impl Default for VoiceProfileStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl VoiceProfileStore {
    /// A store holding only the built-in catalog; nothing is persisted.
    pub fn in_memory() -> Self {
        let profiles = builtin_profiles()
            .into_iter()
            .map(|p| (p.voice_id.clone(), p))
            .collect();
        Self {
            profiles: RwLock::new(profiles),
            dir: None,
        }
    }

    /// Open (creating if needed) a profile directory and load every
    /// `*.json` document in it. Unreadable documents are skipped.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, ProfileError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| ProfileError::Io {
            path: dir.clone(),
            source,
        })?;

        let mut store = Self::in_memory();
        let entries = fs::read_dir(&dir).map_err(|source| ProfileError::Io {
            path: dir.clone(),
            source,
        })?;

        let profiles = store.profiles.get_mut();
        let mut loaded = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_profile(&path) {
                Ok(profile) if profiles.contains_key(&profile.voice_id) => {
                    log::warn!(
                        "Skipping {}: voice id '{}' already loaded",
                        path.display(),
                        profile.voice_id
                    );
                }
                Ok(mut profile) => {
                    profile.builtin = false;
                    profiles.insert(profile.voice_id.clone(), profile);
                    loaded += 1;
                }
                Err(e) => log::warn!("Skipping unreadable profile {}: {e}", path.display()),
            }
        }
        log::info!("Loaded {loaded} custom voice profile(s) from {}", dir.display());

        store.dir = Some(dir);
        Ok(store)
    }

    pub fn get(&self, voice_id: &str) -> Option<VoiceProfile> {
        self.profiles.read().get(voice_id).cloned()
    }

    /// All profiles ordered by voice id.
    pub fn list(&self) -> Vec<VoiceProfile> {
        self.profiles.read().values().cloned().collect()
    }

    /// Profiles matching a gender and/or language filter.
    pub fn filter(&self, gender: Option<Gender>, language: Option<&str>) -> Vec<VoiceProfile> {
        let language = language.and_then(normalize_language);
        self.profiles
            .read()
            .values()
            .filter(|p| gender.map_or(true, |g| p.gender == g))
            .filter(|p| {
                language.as_deref().map_or(true, |l| {
                    p.language.as_deref().and_then(normalize_language).as_deref() == Some(l)
                })
            })
            .cloned()
            .collect()
    }

    /// Insert a new custom profile.
    pub fn create(&self, mut profile: VoiceProfile) -> Result<VoiceProfile, ProfileError> {
        validate_voice_id(&profile.voice_id)?;
        profile.builtin = false;

        let mut profiles = self.profiles.write();
        if profiles.contains_key(&profile.voice_id) {
            return Err(ProfileError::DuplicateVoiceId(profile.voice_id));
        }
        self.persist(&profile)?;
        profiles.insert(profile.voice_id.clone(), profile.clone());
        log::info!(
            "Created voice '{}' ({})",
            profile.voice_id,
            profile.backend_kind
        );
        Ok(profile)
    }

    /// Create a cloned-voice profile from a reference recording.
    ///
    /// Gender and language come from the request when given, otherwise from
    /// `classifier`. English voices bind to [`BackendKind::CloneEnglish`];
    /// every other language, including an undetected one, binds to
    /// [`BackendKind::CloneMultilingual`].
    pub fn create_cloned(
        &self,
        request: CloneProfileRequest,
        classifier: &dyn VoiceClassifier,
    ) -> Result<VoiceProfile, ProfileError> {
        let name = sanitize_name(&request.name)?;
        let voice_id = name.replace(' ', "_").to_lowercase();

        if !request.reference_audio.is_file() {
            return Err(ProfileError::Io {
                path: request.reference_audio,
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "reference audio not found",
                ),
            });
        }

        let gender = match request.gender {
            Some(g) if g != Gender::Unknown => g,
            _ => classifier.detect_gender(&request.reference_audio),
        };
        let language = request
            .language
            .as_deref()
            .and_then(normalize_language)
            .or_else(|| {
                request
                    .sample_text
                    .as_deref()
                    .and_then(|t| classifier.detect_language(t))
            });
        let backend_kind = match language.as_deref() {
            Some("en") => BackendKind::CloneEnglish,
            _ => BackendKind::CloneMultilingual,
        };

        let mut backend_params = BTreeMap::new();
        backend_params.insert(
            PARAM_REFERENCE_AUDIO.to_string(),
            request.reference_audio.to_string_lossy().into_owned(),
        );
        if let Some(notes) = request.notes {
            backend_params.insert(PARAM_NOTES.to_string(), notes);
        }

        self.create(VoiceProfile {
            voice_id,
            name,
            backend_kind,
            language,
            gender,
            backend_params,
            builtin: false,
            created_at: Utc::now(),
        })
    }

    /// Edit name, language, gender or notes of a custom profile.
    pub fn update_metadata(
        &self,
        voice_id: &str,
        update: MetadataUpdate,
    ) -> Result<VoiceProfile, ProfileError> {
        let mut profiles = self.profiles.write();
        let current = profiles
            .get(voice_id)
            .ok_or_else(|| ProfileError::NotFound(voice_id.to_string()))?;
        if current.builtin {
            return Err(ProfileError::BuiltinVoice(voice_id.to_string()));
        }

        let mut updated = current.clone();
        if let Some(name) = update.name {
            updated.name = sanitize_name(&name)?;
        }
        if let Some(language) = update.language {
            updated.language = language.as_deref().and_then(normalize_language);
        }
        if let Some(gender) = update.gender {
            updated.gender = gender;
        }
        if let Some(notes) = update.notes {
            updated.backend_params.insert(PARAM_NOTES.to_string(), notes);
        }

        self.persist(&updated)?;
        profiles.insert(voice_id.to_string(), updated.clone());
        Ok(updated)
    }

    /// Remove a custom profile and its document.
    pub fn delete(&self, voice_id: &str) -> Result<VoiceProfile, ProfileError> {
        let mut profiles = self.profiles.write();
        match profiles.get(voice_id) {
            None => return Err(ProfileError::NotFound(voice_id.to_string())),
            Some(p) if p.builtin => return Err(ProfileError::BuiltinVoice(voice_id.to_string())),
            Some(_) => {}
        }

        if let Some(path) = self.document_path(voice_id) {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => return Err(ProfileError::Io { path, source }),
            }
        }
        let removed = profiles
            .remove(voice_id)
            .ok_or_else(|| ProfileError::NotFound(voice_id.to_string()))?;
        log::info!("Deleted voice '{voice_id}'");
        Ok(removed)
    }

    /// Closest built-in cloud voice for a language and gender.
    pub fn best_builtin_voice(&self, language: Option<&str>, gender: Gender) -> &'static str {
        nearest_builtin(language, gender)
    }

    fn document_path(&self, voice_id: &str) -> Option<PathBuf> {
        self.dir.as_ref().map(|d| d.join(format!("{voice_id}.json")))
    }

    fn persist(&self, profile: &VoiceProfile) -> Result<(), ProfileError> {
        let Some(path) = self.document_path(&profile.voice_id) else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(profile)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .and_then(|()| fs::rename(&tmp, &path))
            .map_err(|source| ProfileError::Io { path, source })
    }
}

fn read_profile(path: &Path) -> Result<VoiceProfile, ProfileError> {
    let text = fs::read_to_string(path).map_err(|source| ProfileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&text)?)
}

/// Keep word characters, whitespace and hyphens; trim the rest.
fn sanitize_name(name: &str) -> Result<String, ProfileError> {
    let safe: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-' || c.is_whitespace())
        .collect();
    let safe = safe.trim();
    if safe.is_empty() {
        return Err(ProfileError::InvalidName(name.to_string()));
    }
    Ok(safe.to_string())
}

fn validate_voice_id(voice_id: &str) -> Result<(), ProfileError> {
    let valid = !voice_id.is_empty()
        && voice_id
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.')
        && !voice_id.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(ProfileError::InvalidName(voice_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_punctuation() {
        assert_eq!(sanitize_name("  My Voice!?  ").unwrap(), "My Voice");
        assert_eq!(sanitize_name("née-Zoë_2").unwrap(), "née-Zoë_2");
        assert!(matches!(
            sanitize_name("!!!"),
            Err(ProfileError::InvalidName(_))
        ));
    }

    #[test]
    fn voice_ids_must_be_file_safe() {
        assert!(validate_voice_id("en-US-AriaNeural").is_ok());
        assert!(validate_voice_id("my_voice").is_ok());
        assert!(validate_voice_id("../escape").is_err());
        assert!(validate_voice_id("a/b").is_err());
        assert!(validate_voice_id("").is_err());
    }

    #[test]
    fn in_memory_store_has_catalog() {
        let store = VoiceProfileStore::in_memory();
        let aria = store.get("en-US-AriaNeural").unwrap();
        assert!(aria.builtin);
        assert_eq!(aria.backend_kind, BackendKind::CloudNeural);
        assert_eq!(store.filter(Some(Gender::Male), Some("fr")).len(), 1);
    }
}
