//! Pre-made style templates.
//!
//! Strategy: short directive positive prompt plus a long, specific negative
//! prompt, so the model preserves the original composition.

/// One transformation style: prompt, recommended strength, negative prompt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StylePreset {
    pub name: &'static str,
    pub prompt: &'static str,
    pub strength: f32,
    pub negative_prompt: &'static str,
}

/// A named group of presets.
#[derive(Debug, Clone, Copy)]
pub struct StyleCategory {
    pub name: &'static str,
    pub presets: &'static [StylePreset],
}

pub static ARTISTIC_STYLES: [StylePreset; 4] = [
    StylePreset {
        name: "Oil Painting",
        prompt: "Apply classical oil painting style with visible brush strokes and canvas texture",
        strength: 0.40,
        negative_prompt: "photograph, photorealistic, photo, digital art, flat colors, no texture, smooth surface, different composition, changed layout, altered subject, moved elements, repositioned objects, deformed, distorted, blurry, low quality, bad anatomy, disfigured, ugly, artificial, plastic look, oversaturated",
    },
    StylePreset {
        name: "Watercolor",
        prompt: "Apply watercolor painting style with soft flowing colors and paper texture",
        strength: 0.35,
        negative_prompt: "photograph, photo, sharp edges, hard lines, digital, flat, no texture, different composition, changed layout, altered pose, moved subject, repositioned elements, deformed, distorted, blurry, low quality, artificial, oversaturated, dark, muddy colors",
    },
    StylePreset {
        name: "Sketch",
        prompt: "Apply pencil sketch style with hand-drawn lines and crosshatching",
        strength: 0.45,
        negative_prompt: "color, colored, painted, photograph, photo, digital, smooth, no lines, no texture, different composition, changed layout, altered subject, moved elements, deformed anatomy, distorted features, blurry, low quality, messy, unclear lines, smudged",
    },
    StylePreset {
        name: "Digital Art",
        prompt: "Apply modern digital art style with vibrant colors and smooth rendering",
        strength: 0.38,
        negative_prompt: "photograph, photo, traditional painting, old style, rough texture, grainy, different composition, changed layout, altered pose, moved subject, repositioned elements, deformed, distorted, blurry, low quality, bad anatomy, pixelated, compression artifacts",
    },
];

pub static PHOTO_STYLES: [StylePreset; 4] = [
    StylePreset {
        name: "Vintage",
        prompt: "Apply vintage photo effect with retro color grading and subtle film grain",
        strength: 0.25,
        negative_prompt: "modern, digital, sharp, clean, oversaturated, vibrant, different composition, changed layout, altered subject, moved elements, repositioned objects, added objects, removed objects, deformed, distorted, blurry beyond vintage effect, low quality, artificial HDR",
    },
    StylePreset {
        name: "Black and White",
        prompt: "Convert to black and white photography with rich tonal range",
        strength: 0.22,
        negative_prompt: "color, colored, colorful, tinted, sepia beyond black and white, different composition, changed layout, altered subject, moved elements, repositioned objects, added elements, removed elements, deformed, distorted, low contrast, muddy, blurry, low quality",
    },
    StylePreset {
        name: "HDR",
        prompt: "Apply HDR photography effect with enhanced dynamic range and vivid details",
        strength: 0.20,
        negative_prompt: "flat, dull, underexposed, overexposed, overprocessed, unrealistic, cartoon, painted, different composition, changed layout, altered subject, moved elements, repositioned objects, halos, artifacts, deformed, distorted, blurry, low quality, fake looking",
    },
    StylePreset {
        name: "Film Grain",
        prompt: "Apply 35mm film photography effect with natural grain texture and cinematic color",
        strength: 0.25,
        negative_prompt: "digital, clean, sharp, no grain, plastic look, oversaturated, different composition, changed layout, altered subject, moved elements, repositioned objects, deformed, distorted, excessive grain, noise, blurry beyond film aesthetic, low quality, artificial",
    },
];

pub static FANTASY_STYLES: [StylePreset; 3] = [
    StylePreset {
        name: "Anime",
        prompt: "Apply anime art style with cel-shading and clean outlines",
        strength: 0.35,
        negative_prompt: "realistic photograph, photorealistic, photo, real life, 3D render, western cartoon, different composition, changed layout, altered pose, moved subject, repositioned elements, different character, changed face, deformed anatomy, distorted features, wrong proportions, extra limbs, missing limbs, blurry, low quality, bad anatomy, ugly, disfigured, malformed, mutation",
    },
    StylePreset {
        name: "Cartoon",
        prompt: "Apply cartoon illustration style with bold outlines and simplified shapes",
        strength: 0.40,
        negative_prompt: "realistic, photograph, photo, detailed, complex, textured, anime, different composition, changed layout, altered pose, moved subject, repositioned elements, different character, deformed anatomy, distorted features, wrong proportions, blurry, low quality, bad anatomy, ugly, messy lines, unclear",
    },
    StylePreset {
        name: "Comic Book",
        prompt: "Apply comic book art style with bold ink lines and vibrant colors",
        strength: 0.38,
        negative_prompt: "photograph, photo, realistic, soft, watercolor, no outlines, different composition, changed layout, altered pose, moved subject, repositioned elements, different scene, deformed anatomy, distorted features, wrong proportions, blurry, low quality, bad anatomy, messy, unclear lines, muddy colors",
    },
];

/// All preset categories.
pub static ALL_CATEGORIES: [StyleCategory; 3] = [
    StyleCategory {
        name: "Artistic",
        presets: &ARTISTIC_STYLES,
    },
    StyleCategory {
        name: "Photo",
        presets: &PHOTO_STYLES,
    },
    StyleCategory {
        name: "Fantasy",
        presets: &FANTASY_STYLES,
    },
];

/// Iterate every preset across all categories.
pub fn all_presets() -> impl Iterator<Item = &'static StylePreset> {
    ALL_CATEGORIES.iter().flat_map(|c| c.presets.iter())
}

/// Look up a preset by name, case-insensitively.
pub fn find_preset(name: &str) -> Option<&'static StylePreset> {
    all_presets().find(|p| p.name.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_counts() {
        assert_eq!(all_presets().count(), 11);
        assert_eq!(ALL_CATEGORIES.len(), 3);
    }

    #[test]
    fn test_find_preset() {
        let preset = find_preset("oil painting").unwrap();
        assert_eq!(preset.strength, 0.40);
        assert!(preset.prompt.contains("brush strokes"));
        assert!(find_preset("No Such Style").is_none());
    }

    #[test]
    fn test_presets_are_complete() {
        for preset in all_presets() {
            assert!(!preset.prompt.is_empty(), "{} has empty prompt", preset.name);
            assert!(
                !preset.negative_prompt.is_empty(),
                "{} has empty negative prompt",
                preset.name
            );
            assert!(preset.strength > 0.0 && preset.strength < 1.0);
        }
    }
}
