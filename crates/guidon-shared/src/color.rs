use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ColorError;

/// Named colors accepted by `/draw`, in display order.
pub const COLOR_NAMES: &[(&str, &str)] = &[
    ("red", "#FF0000"),
    ("green", "#00FF00"),
    ("blue", "#0000FF"),
    ("yellow", "#FFFF00"),
    ("orange", "#FFA500"),
    ("purple", "#800080"),
    ("pink", "#FFC0CB"),
    ("brown", "#A52A2A"),
    ("black", "#000000"),
    ("white", "#FFFFFF"),
    ("gray", "#808080"),
    ("grey", "#808080"),
    ("cyan", "#00FFFF"),
    ("magenta", "#FF00FF"),
    ("lime", "#00FF00"),
    ("navy", "#000080"),
    ("teal", "#008080"),
    ("maroon", "#800000"),
    ("olive", "#808000"),
    ("silver", "#C0C0C0"),
    ("gold", "#FFD700"),
    ("coral", "#FF7F50"),
    ("salmon", "#FA8072"),
    ("khaki", "#F0E68C"),
    ("violet", "#EE82EE"),
    ("indigo", "#4B0082"),
    ("turquoise", "#40E0D0"),
    ("crimson", "#DC143C"),
];

/// A normalized `#RRGGBB` color (uppercase).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color(String);

impl Color {
    /// Parse a named color or hex code. `ff0000`, `#ff0000` and `Red` all work.
    pub fn parse(input: &str) -> Result<Self, ColorError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ColorError::Empty);
        }

        let lower = trimmed.to_ascii_lowercase();
        if let Some((_, hex)) = COLOR_NAMES.iter().find(|(name, _)| *name == lower) {
            return Ok(Self((*hex).to_string()));
        }

        Self::from_hex(trimmed)
    }

    /// Strict `#RRGGBB` check, case-insensitive, `#` optional.
    pub fn from_hex(input: &str) -> Result<Self, ColorError> {
        let digits = input.trim().trim_start_matches('#');
        if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ColorError::Invalid(input.to_string()));
        }
        Ok(Self(format!("#{}", digits.to_ascii_uppercase())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The color as a 24-bit integer, for embed accents.
    pub fn to_rgb(&self) -> u32 {
        u32::from_str_radix(&self.0[1..], 16).unwrap_or(0)
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Color {
    type Error = ColorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.0
    }
}

/// Short hint listing the first few named colors.
pub fn named_color_hint() -> String {
    let names: Vec<&str> = COLOR_NAMES.iter().take(10).map(|(n, _)| *n).collect();
    format!("{}...", names.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_colors() {
        assert_eq!(Color::parse("red").unwrap().as_str(), "#FF0000");
        assert_eq!(Color::parse("  Grey ").unwrap().as_str(), "#808080");
        assert_eq!(Color::parse("crimson").unwrap().as_str(), "#DC143C");
        assert_eq!(COLOR_NAMES.len(), 28);
    }

    #[test]
    fn test_hex_normalization() {
        assert_eq!(Color::parse("#ff00aa").unwrap().as_str(), "#FF00AA");
        assert_eq!(Color::parse("00ff00").unwrap().as_str(), "#00FF00");
        assert_eq!(Color::parse("#00FF00").unwrap().to_rgb(), 0x00FF00);
    }

    #[test]
    fn test_invalid_colors() {
        assert_eq!(Color::parse(""), Err(ColorError::Empty));
        assert!(Color::parse("#FFF").is_err());
        assert!(Color::parse("#GG0000").is_err());
        assert!(Color::parse("rainbow").is_err());
        assert!(Color::from_hex("red").is_err());
    }
}
