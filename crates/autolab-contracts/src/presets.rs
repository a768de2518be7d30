use serde::{Deserialize, Serialize};

/// Aspect ratio choices offered to the user, in display order.
pub const ASPECT_RATIOS: &[&str] = &["1:1", "4:5", "9:16", "16:9", "3:4"];

pub fn is_known_aspect_ratio(ratio: &str) -> bool {
    ASPECT_RATIOS.iter().any(|known| *known == ratio.trim())
}

/// Named style clause appended to the prompt draft to steer composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StylePreset {
    #[default]
    None,
    Studio,
    Lifestyle,
    SocialAd,
    Configurator,
}

impl StylePreset {
    pub const ALL: [StylePreset; 4] = [
        StylePreset::Studio,
        StylePreset::Lifestyle,
        StylePreset::SocialAd,
        StylePreset::Configurator,
    ];

    /// Selector label shown to the user.
    pub fn label(self) -> &'static str {
        match self {
            StylePreset::None => "— None",
            StylePreset::Studio => "Studio – glossy floor, softbox reflection, brand backdrop",
            StylePreset::Lifestyle => "Lifestyle – sunset coast road, motion blur, lens flare",
            StylePreset::SocialAd => "Social Ad – top-down, product-first, bold CTA zone",
            StylePreset::Configurator => "Configurator – clean side profile, neutral light, shadow",
        }
    }

    /// The clause appended to the prompt when this preset is applied.
    pub fn clause(self) -> Option<&'static str> {
        match self {
            StylePreset::None => None,
            StylePreset::Studio => Some(
                "studio lighting, glossy floor reflections, seamless backdrop with subtle logo pattern",
            ),
            StylePreset::Lifestyle => Some(
                "golden hour, coastal road, slight motion blur, natural lens flare, lifestyle feel",
            ),
            StylePreset::SocialAd => Some(
                "flat-lay/top-down camera, high contrast, clear negative space for CTA overlay",
            ),
            StylePreset::Configurator => Some(
                "orthographic side view, neutral lighting, realistic soft shadow on ground",
            ),
        }
    }

    pub fn from_label(label: &str) -> Option<StylePreset> {
        let trimmed = label.trim();
        if trimmed == StylePreset::None.label() {
            return Some(StylePreset::None);
        }
        StylePreset::ALL
            .into_iter()
            .find(|preset| preset.label() == trimmed)
    }
}

/// Appends a preset clause to `draft`, separated by one blank line when the
/// draft is non-empty. Re-applying the same preset appends the clause again;
/// stacking is the observed product behavior, not deduplicated here.
pub fn apply_preset(draft: &str, preset: StylePreset) -> String {
    let Some(clause) = preset.clause() else {
        return draft.to_string();
    };
    if draft.is_empty() {
        clause.trim().to_string()
    } else {
        format!("{draft}\n\n{clause}").trim().to_string()
    }
}
