//! Catalog of cloud neural voices every store starts with.

use chrono::{DateTime, Utc};

use super::{Gender, VoiceProfile, PARAM_VOICE};
use crate::BackendKind;

/// Voice used when nothing in the catalog matches.
pub const DEFAULT_CLOUD_VOICE: &str = "en-US-AriaNeural";

/// `(short name, display name, gender)`; the language is the short name's
/// first subtag.
pub const BUILTIN_VOICES: &[(&str, &str, Gender)] = &[
    ("en-US-AriaNeural", "Aria (US)", Gender::Female),
    ("en-US-JennyNeural", "Jenny (US)", Gender::Female),
    ("en-US-SaraNeural", "Sara (US)", Gender::Female),
    ("en-US-NancyNeural", "Nancy (US)", Gender::Female),
    ("en-US-MichelleNeural", "Michelle (US)", Gender::Female),
    ("en-US-GuyNeural", "Guy (US)", Gender::Male),
    ("en-US-DavisNeural", "Davis (US)", Gender::Male),
    ("en-US-TonyNeural", "Tony (US)", Gender::Male),
    ("en-US-JasonNeural", "Jason (US)", Gender::Male),
    ("en-GB-SoniaNeural", "Sonia (GB)", Gender::Female),
    ("en-GB-MiaNeural", "Mia (GB)", Gender::Female),
    ("en-GB-RyanNeural", "Ryan (GB)", Gender::Male),
    ("en-GB-ThomasNeural", "Thomas (GB)", Gender::Male),
    ("en-AU-NatashaNeural", "Natasha (AU)", Gender::Female),
    ("en-AU-WilliamNeural", "William (AU)", Gender::Male),
    ("fr-FR-DeniseNeural", "Denise (FR)", Gender::Female),
    ("fr-FR-EloiseNeural", "Eloise (FR)", Gender::Female),
    ("fr-FR-HenriNeural", "Henri (FR)", Gender::Male),
    ("de-DE-KatjaNeural", "Katja (DE)", Gender::Female),
    ("de-DE-SeraphinaNeural", "Seraphina (DE)", Gender::Female),
    ("de-DE-ConradNeural", "Conrad (DE)", Gender::Male),
    ("es-ES-ElviraNeural", "Elvira (ES)", Gender::Female),
    ("es-ES-AlvaroNeural", "Alvaro (ES)", Gender::Male),
    ("es-MX-DaliaNeural", "Dalia (MX)", Gender::Female),
    ("es-MX-JorgeNeural", "Jorge (MX)", Gender::Male),
    ("it-IT-ElsaNeural", "Elsa (IT)", Gender::Female),
    ("it-IT-DiegoNeural", "Diego (IT)", Gender::Male),
    ("pt-BR-FranciscaNeural", "Francisca (BR)", Gender::Female),
    ("pt-BR-AntonioNeural", "Antonio (BR)", Gender::Male),
    ("pl-PL-ZofiaNeural", "Zofia (PL)", Gender::Female),
    ("pl-PL-MarekNeural", "Marek (PL)", Gender::Male),
    ("ru-RU-SvetlanaNeural", "Svetlana (RU)", Gender::Female),
    ("ru-RU-DmitryNeural", "Dmitry (RU)", Gender::Male),
    ("ja-JP-NanamiNeural", "Nanami (JP)", Gender::Female),
    ("ja-JP-KeitaNeural", "Keita (JP)", Gender::Male),
    ("ko-KR-SunHiNeural", "SunHi (KR)", Gender::Female),
    ("ko-KR-InJoonNeural", "InJoon (KR)", Gender::Male),
    ("zh-CN-XiaoxiaoNeural", "Xiaoxiao (CN)", Gender::Female),
    ("zh-CN-YunxiNeural", "Yunxi (CN)", Gender::Male),
    ("zh-HK-HiuGaaiNeural", "HiuGaai (HK)", Gender::Female),
    ("ar-SA-ZariyahNeural", "Zariyah (SA)", Gender::Female),
    ("ar-SA-HamedNeural", "Hamed (SA)", Gender::Male),
    ("hi-IN-SwaraNeural", "Swara (IN)", Gender::Female),
    ("hi-IN-MadhurNeural", "Madhur (IN)", Gender::Male),
    ("sv-SE-HildaNeural", "Hilda (SE)", Gender::Female),
    ("sv-SE-MattiasNeural", "Mattias (SE)", Gender::Male),
    ("da-DK-ChristelNeural", "Christel (DK)", Gender::Female),
    ("da-DK-JeppeNeural", "Jeppe (DK)", Gender::Male),
    ("fi-FI-NooraNeural", "Noora (FI)", Gender::Female),
    ("fi-FI-HarriNeural", "Harri (FI)", Gender::Male),
    ("uk-UA-PolinaNeural", "Polina (UA)", Gender::Female),
    ("uk-UA-OstapNeural", "Ostap (UA)", Gender::Male),
];

/// Display names accepted in place of language codes.
const LANGUAGE_NAMES: &[(&str, &str)] = &[
    ("en", "English"),
    ("fr", "French"),
    ("de", "German"),
    ("es", "Spanish"),
    ("it", "Italian"),
    ("pt", "Portuguese"),
    ("pl", "Polish"),
    ("tr", "Turkish"),
    ("ru", "Russian"),
    ("nl", "Dutch"),
    ("cs", "Czech"),
    ("ar", "Arabic"),
    ("zh", "Chinese"),
    ("ja", "Japanese"),
    ("ko", "Korean"),
    ("hu", "Hungarian"),
    ("hi", "Hindi"),
    ("sv", "Swedish"),
    ("da", "Danish"),
    ("fi", "Finnish"),
    ("no", "Norwegian"),
    ("uk", "Ukrainian"),
];

/// Reduce a language tag or display name to its lowercase primary subtag.
///
/// `"fr-FR"` and `"French"` both become `"fr"`; any Chinese variant becomes
/// `"zh"`. Returns `None` for empty input and the `"unknown"` marker.
pub fn normalize_language(language: &str) -> Option<String> {
    let trimmed = language.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("unknown") {
        return None;
    }
    if let Some((code, _)) = LANGUAGE_NAMES
        .iter()
        .find(|(_, name)| name.eq_ignore_ascii_case(trimmed))
    {
        return Some((*code).to_string());
    }
    let primary = trimmed
        .split(['-', '_'])
        .next()
        .unwrap_or(trimmed)
        .to_ascii_lowercase();
    Some(primary)
}

/// Build the profiles for [`BUILTIN_VOICES`].
pub fn builtin_profiles() -> Vec<VoiceProfile> {
    BUILTIN_VOICES
        .iter()
        .map(|&(short_name, name, gender)| VoiceProfile {
            voice_id: short_name.to_string(),
            name: name.to_string(),
            backend_kind: BackendKind::CloudNeural,
            language: normalize_language(short_name),
            gender,
            backend_params: [(PARAM_VOICE.to_string(), short_name.to_string())]
                .into_iter()
                .collect(),
            builtin: true,
            created_at: DateTime::<Utc>::default(),
        })
        .collect()
}

/// Pick the closest catalog voice.
///
/// Tries language and gender together, then language alone, then gender
/// alone, then [`DEFAULT_CLOUD_VOICE`]. An unknown gender or language is
/// treated as "any".
pub fn nearest_builtin(language: Option<&str>, gender: Gender) -> &'static str {
    let language = language.and_then(normalize_language);
    let gender = (gender != Gender::Unknown).then_some(gender);

    let matches = |want_lang: Option<&str>, want_gender: Option<Gender>| {
        BUILTIN_VOICES.iter().find(|(short_name, _, g)| {
            want_lang.map_or(true, |l| {
                normalize_language(short_name).as_deref() == Some(l)
            }) && want_gender.map_or(true, |want| *g == want)
        })
    };

    let attempts = [
        (language.as_deref(), gender),
        (language.as_deref(), None),
        (None, gender),
    ];
    let voice = attempts
        .into_iter()
        .filter(|(l, g)| l.is_some() || g.is_some())
        .find_map(|(l, g)| matches(l, g))
        .map_or(DEFAULT_CLOUD_VOICE, |voice| voice.0);
    voice
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_short_names_are_unique() {
        let mut names: Vec<_> = BUILTIN_VOICES.iter().map(|v| v.0).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), BUILTIN_VOICES.len());
    }

    #[test]
    fn every_catalog_voice_has_a_gender() {
        assert!(BUILTIN_VOICES.iter().all(|v| v.2 != Gender::Unknown));
    }

    #[test]
    fn normalizes_tags_and_display_names() {
        assert_eq!(normalize_language("fr-FR").as_deref(), Some("fr"));
        assert_eq!(normalize_language("French").as_deref(), Some("fr"));
        assert_eq!(normalize_language("zh-HK").as_deref(), Some("zh"));
        assert_eq!(normalize_language("Unknown"), None);
        assert_eq!(normalize_language(""), None);
        assert_eq!(normalize_language("Portuguese").as_deref(), Some("pt"));
    }

    #[test]
    fn nearest_prefers_language_and_gender() {
        assert_eq!(nearest_builtin(Some("fr"), Gender::Male), "fr-FR-HenriNeural");
        assert_eq!(nearest_builtin(Some("de"), Gender::Female), "de-DE-KatjaNeural");
    }

    #[test]
    fn nearest_falls_back_to_language_then_gender() {
        assert_eq!(nearest_builtin(Some("zh"), Gender::Unknown), "zh-CN-XiaoxiaoNeural");
        assert_eq!(nearest_builtin(Some("xx"), Gender::Male), "en-US-GuyNeural");
    }

    #[test]
    fn nearest_defaults_when_nothing_is_known() {
        assert_eq!(nearest_builtin(None, Gender::Unknown), DEFAULT_CLOUD_VOICE);
        assert_eq!(nearest_builtin(Some("xx"), Gender::Unknown), DEFAULT_CLOUD_VOICE);
    }

    #[test]
    fn builtin_profiles_bind_cloud_voices() {
        let profiles = builtin_profiles();
        assert_eq!(profiles.len(), BUILTIN_VOICES.len());
        let aria = &profiles[0];
        assert_eq!(aria.cloud_voice(), Some(DEFAULT_CLOUD_VOICE));
        assert_eq!(aria.language.as_deref(), Some("en"));
        assert!(aria.builtin);
    }
}
