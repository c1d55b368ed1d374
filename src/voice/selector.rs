//! Default voice selection
//!
//! Ranks a platform voice catalogue by preference tiers, highest first:
//! 1. a preferred voice name (in the configured order)
//! 2. an exact language match on an on-device voice not marked male
//! 3. an exact language match not marked male
//! 4. the same primary language not marked male
//!
//! When no tier matches, the first voice not marked male wins, then the
//! first voice of the catalogue.

use super::VoiceDescriptor;

/// Voice names preferred out of the box, best first
const DEFAULT_PREFERRED: &[&str] = &[
    "Samantha",
    "Google US English",
    "Microsoft Aria",
    "Microsoft Jenny",
    "Karen",
    "Moira",
    "Tessa",
    "nova",
    "shimmer",
];

/// Picks a default synthesis voice from a catalogue
#[derive(Debug, Clone)]
pub struct VoiceSelector {
    preferred_names: Vec<String>,
    language: String,
}

impl Default for VoiceSelector {
    fn default() -> Self {
        Self::new(
            DEFAULT_PREFERRED.iter().map(ToString::to_string).collect(),
            "en-US",
        )
    }
}

impl VoiceSelector {
    /// Create a selector with explicit preferences
    #[must_use]
    pub fn new(preferred_names: Vec<String>, language: &str) -> Self {
        Self {
            preferred_names,
            language: language.to_string(),
        }
    }

    /// Selector for `language` with the built-in name preferences
    #[must_use]
    pub fn for_language(language: &str) -> Self {
        Self {
            language: language.to_string(),
            ..Self::default()
        }
    }

    /// Target language tag
    #[must_use]
    pub fn language(&self) -> &str {
        &self.language
    }

    /// Pick the best voice, or `None` for an empty catalogue
    #[must_use]
    pub fn pick_default<'a>(&self, voices: &'a [VoiceDescriptor]) -> Option<&'a VoiceDescriptor> {
        if voices.is_empty() {
            return None;
        }

        for preferred in &self.preferred_names {
            let wanted = preferred.to_lowercase();
            if let Some(voice) = voices.iter().find(|v| {
                v.name.to_lowercase().contains(&wanted) || v.id.eq_ignore_ascii_case(&wanted)
            }) {
                tracing::debug!(voice = %voice.name, "picked preferred voice");
                return Some(voice);
            }
        }

        let primary = primary_subtag(&self.language);
        let tiers: [&dyn Fn(&VoiceDescriptor) -> bool; 3] = [
            &|v: &VoiceDescriptor| {
                same_tag(&v.language, &self.language) && v.local && !v.is_marked_male()
            },
            &|v: &VoiceDescriptor| same_tag(&v.language, &self.language) && !v.is_marked_male(),
            &|v: &VoiceDescriptor| primary_subtag(&v.language) == primary && !v.is_marked_male(),
        ];

        for (tier, matches) in tiers.iter().enumerate() {
            if let Some(voice) = voices.iter().find(|v| matches(v)) {
                tracing::debug!(voice = %voice.name, tier = tier + 2, "picked voice by language");
                return Some(voice);
            }
        }

        let fallback = voices
            .iter()
            .find(|v| !v.is_marked_male())
            .or_else(|| voices.first());
        if let Some(voice) = fallback {
            tracing::debug!(voice = %voice.name, "no preferred voice, using fallback");
        }
        fallback
    }

    /// Find a voice by exact name or id
    #[must_use]
    pub fn find<'a>(voices: &'a [VoiceDescriptor], name: &str) -> Option<&'a VoiceDescriptor> {
        voices
            .iter()
            .find(|v| v.name == name)
            .or_else(|| voices.iter().find(|v| v.id == name))
    }
}

/// Pick a default voice with the built-in preferences
#[must_use]
pub fn pick_default(voices: &[VoiceDescriptor]) -> Option<&VoiceDescriptor> {
    VoiceSelector::default().pick_default(voices)
}

fn same_tag(a: &str, b: &str) -> bool {
    a.replace('_', "-").eq_ignore_ascii_case(&b.replace('_', "-"))
}

fn primary_subtag(tag: &str) -> String {
    tag.split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::VoiceGender;

    fn voice(name: &str, language: &str, local: bool, gender: Option<VoiceGender>) -> VoiceDescriptor {
        VoiceDescriptor {
            id: format!("id-{}", name.to_lowercase().replace(' ', "-")),
            name: name.to_string(),
            language: language.to_string(),
            local,
            gender,
        }
    }

    #[test]
    fn test_empty_catalogue() {
        assert!(pick_default(&[]).is_none());
    }

    #[test]
    fn test_preferred_name_wins() {
        let voices = vec![
            voice("Daniel", "en-GB", true, Some(VoiceGender::Male)),
            voice("Fiona", "en-US", true, Some(VoiceGender::Female)),
            voice("Samantha", "en-US", false, None),
        ];
        assert_eq!(pick_default(&voices).map(|v| v.name.as_str()), Some("Samantha"));
    }

    #[test]
    fn test_preference_order() {
        let voices = vec![
            voice("Karen", "en-AU", true, None),
            voice("Google US English", "en-US", false, None),
        ];
        assert_eq!(
            pick_default(&voices).map(|v| v.name.as_str()),
            Some("Google US English")
        );
    }

    #[test]
    fn test_local_language_match() {
        let voices = vec![
            voice("Remote", "en-US", false, Some(VoiceGender::Female)),
            voice("Local", "en_US", true, Some(VoiceGender::Female)),
        ];
        assert_eq!(pick_default(&voices).map(|v| v.name.as_str()), Some("Local"));
    }

    #[test]
    fn test_primary_language_match() {
        let voices = vec![
            voice("Amelie", "fr-CA", true, None),
            voice("Serena", "en-GB", true, None),
        ];
        assert_eq!(pick_default(&voices).map(|v| v.name.as_str()), Some("Serena"));
    }

    #[test]
    fn test_non_male_fallback() {
        let voices = vec![
            voice("Jorge", "es-ES", true, Some(VoiceGender::Male)),
            voice("Monica", "es-ES", true, None),
        ];
        assert_eq!(pick_default(&voices).map(|v| v.name.as_str()), Some("Monica"));
    }

    #[test]
    fn test_first_entry_fallback() {
        let voices = vec![
            voice("Jorge", "es-ES", true, Some(VoiceGender::Male)),
            voice("Google espanol Male", "es-ES", false, None),
        ];
        assert_eq!(pick_default(&voices).map(|v| v.name.as_str()), Some("Jorge"));
    }

    #[test]
    fn test_custom_language() {
        let selector = VoiceSelector::new(Vec::new(), "de-DE");
        let voices = vec![
            voice("Serena", "en-GB", true, None),
            voice("Anna", "de-DE", true, None),
        ];
        assert_eq!(
            selector.pick_default(&voices).map(|v| v.name.as_str()),
            Some("Anna")
        );
    }

    #[test]
    fn test_find_by_name_or_id() {
        let voices = vec![voice("Samantha", "en-US", true, None)];
        assert!(VoiceSelector::find(&voices, "Samantha").is_some());
        assert!(VoiceSelector::find(&voices, "id-samantha").is_some());
        assert!(VoiceSelector::find(&voices, "Nobody").is_none());
    }
}
