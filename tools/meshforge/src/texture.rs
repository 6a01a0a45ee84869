//! Texture sizing strategies
//!
//! Classifies a texture by keyword match on its name and computes a target
//! power-of-two resolution. Strategies are tried in declaration order; the
//! first keyword match wins, otherwise the default strategy applies.

use serde::Deserialize;

/// Relative processing priority of a texture class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

/// Sizing policy for one texture class.
#[derive(Debug, Clone, Deserialize)]
pub struct TextureStrategy {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub max_size: u32,
    pub min_size: u32,
    #[serde(default)]
    pub round_up: bool,
    pub priority: Priority,
}

/// Global sizing settings shared by every strategy.
#[derive(Debug, Clone, Deserialize)]
pub struct GlobalTextureSettings {
    pub max_size: u32,
    pub min_size: u32,
    /// Textures with both dimensions below this are never resized.
    pub skip_resize_threshold: u32,
    /// Keep sizes that are already power-of-two, square, and in range.
    pub preserve_optimal_sizes: bool,
    /// Collapse non-square results to the smaller dimension.
    pub preserve_aspect_ratio: bool,
}

impl Default for GlobalTextureSettings {
    fn default() -> Self {
        Self {
            max_size: 2048,
            min_size: 128,
            skip_resize_threshold: 128,
            preserve_optimal_sizes: true,
            preserve_aspect_ratio: true,
        }
    }
}

/// The full strategy table. Declaration order of `strategies` is the match
/// priority order.
#[derive(Debug, Clone, Deserialize)]
pub struct TextureConfig {
    #[serde(default)]
    pub global: GlobalTextureSettings,
    #[serde(default = "default_strategies")]
    pub strategies: Vec<TextureStrategy>,
    #[serde(default = "default_strategy")]
    pub default: TextureStrategy,
}

impl Default for TextureConfig {
    fn default() -> Self {
        Self {
            global: GlobalTextureSettings::default(),
            strategies: default_strategies(),
            default: default_strategy(),
        }
    }
}

fn strategy(
    name: &str,
    keywords: &[&str],
    max_size: u32,
    min_size: u32,
    round_up: bool,
    priority: Priority,
) -> TextureStrategy {
    TextureStrategy {
        name: name.to_string(),
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        max_size,
        min_size,
        round_up,
        priority,
    }
}

fn default_strategies() -> Vec<TextureStrategy> {
    vec![
        strategy(
            "albedo",
            &["albedo", "diffuse", "basecolor", "base_color", "color"],
            2048,
            256,
            true,
            Priority::High,
        ),
        strategy(
            "normal",
            &["normal", "normalmap", "normal_map", "bump"],
            1024,
            256,
            false,
            Priority::Medium,
        ),
        strategy(
            "material",
            &[
                "roughness",
                "metallic",
                "metalness",
                "ao",
                "occlusion",
                "ambient_occlusion",
            ],
            1024,
            128,
            false,
            Priority::Low,
        ),
        strategy(
            "emissive",
            &["emissive", "emission", "glow"],
            1024,
            256,
            false,
            Priority::Medium,
        ),
        strategy(
            "alpha",
            &["alpha", "opacity", "transparent"],
            1024,
            256,
            false,
            Priority::Medium,
        ),
    ]
}

fn default_strategy() -> TextureStrategy {
    strategy("default", &[], 1024, 256, false, Priority::Medium)
}

/// Nearest power of two. `round_up` forces the ceiling power; otherwise the
/// numerically closer of floor/ceiling wins, ties rounding down.
pub fn nearest_power_of_two(value: u32, round_up: bool) -> u32 {
    if value <= 1 {
        return 1;
    }
    if value.is_power_of_two() {
        return value;
    }

    let upper = value.next_power_of_two();
    if round_up {
        return upper;
    }
    let lower = upper / 2;
    if value - lower <= upper - value {
        lower
    } else {
        upper
    }
}

fn is_optimal(width: u32, height: u32, strategy: &TextureStrategy) -> bool {
    width.is_power_of_two()
        && height.is_power_of_two()
        && width == height
        && width >= strategy.min_size
        && width <= strategy.max_size
}

impl TextureConfig {
    /// Resolve the strategy for a texture name. Case-insensitive substring
    /// match against each strategy's keywords, in declaration order.
    pub fn resolve(&self, texture_name: &str) -> &TextureStrategy {
        let name = texture_name.to_lowercase();
        self.strategies
            .iter()
            .find(|s| s.keywords.iter().any(|k| name.contains(k.as_str())))
            .unwrap_or(&self.default)
    }

    /// Compute the target size for a texture under the given strategy.
    pub fn target_size(
        &self,
        width: u32,
        height: u32,
        strategy: &TextureStrategy,
    ) -> (u32, u32) {
        // Tiny textures are never upscaled.
        if width < self.global.skip_resize_threshold && height < self.global.skip_resize_threshold
        {
            return (width, height);
        }

        if self.global.preserve_optimal_sizes && is_optimal(width, height, strategy) {
            return (width, height);
        }

        let mut new_width = nearest_power_of_two(width, strategy.round_up);
        let mut new_height = nearest_power_of_two(height, strategy.round_up);

        new_width = new_width.clamp(strategy.min_size, strategy.max_size);
        new_height = new_height.clamp(strategy.min_size, strategy.max_size);

        if self.global.preserve_aspect_ratio && new_width != new_height {
            let size = new_width.min(new_height);
            new_width = size;
            new_height = size;
        }

        (new_width, new_height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_keyword_match() {
        let config = TextureConfig::default();
        assert_eq!(config.resolve("Rock_Diffuse_2k").name, "albedo");
        assert_eq!(config.resolve("brick_NORMAL").name, "normal");
        assert_eq!(config.resolve("wall_roughness").name, "material");
        assert_eq!(config.resolve("lamp_emission").name, "emissive");
        assert_eq!(config.resolve("glass_opacity").name, "alpha");
        assert_eq!(config.resolve("mystery").name, "default");
    }

    #[test]
    fn test_first_declared_strategy_wins() {
        let config = TextureConfig::default();
        // Matches both the albedo and normal keyword sets; albedo is declared
        // first and must win.
        assert_eq!(config.resolve("Albedo_Normal").name, "albedo");
    }

    #[test]
    fn test_nearest_power_of_two() {
        assert_eq!(nearest_power_of_two(0, false), 1);
        assert_eq!(nearest_power_of_two(1, false), 1);
        assert_eq!(nearest_power_of_two(512, false), 512);
        assert_eq!(nearest_power_of_two(700, false), 512);
        assert_eq!(nearest_power_of_two(900, false), 1024);
        assert_eq!(nearest_power_of_two(700, true), 1024);
        // Equidistant values round down.
        assert_eq!(nearest_power_of_two(48, false), 32);
        assert_eq!(nearest_power_of_two(48, true), 64);
    }

    #[test]
    fn test_optimal_size_is_idempotent() {
        let config = TextureConfig::default();
        let strategy = config.resolve("albedo");
        assert_eq!(config.target_size(1024, 1024, strategy), (1024, 1024));
        assert_eq!(config.target_size(256, 256, strategy), (256, 256));
    }

    #[test]
    fn test_tiny_textures_not_upscaled() {
        let config = TextureConfig::default();
        let strategy = config.resolve("something");
        assert_eq!(config.target_size(64, 32, strategy), (64, 32));
    }

    #[test]
    fn test_resize_clamps_and_squares() {
        let config = TextureConfig::default();
        let strategy = config.resolve("wall_albedo");

        // 4000 -> 4096 -> clamped to 2048
        assert_eq!(config.target_size(4000, 4000, strategy), (2048, 2048));

        // Non-square collapses to the smaller clamped dimension.
        assert_eq!(config.target_size(2000, 500, strategy), (512, 512));
    }

    #[test]
    fn test_round_up_strategy() {
        let config = TextureConfig::default();
        let albedo = config.resolve("albedo");
        assert!(albedo.round_up);
        // 600 rounds up to 1024 for albedo, but down to 512 for normal maps.
        assert_eq!(config.target_size(600, 600, albedo), (1024, 1024));
        let normal = config.resolve("normal");
        assert_eq!(config.target_size(600, 600, normal), (512, 512));
    }
}
