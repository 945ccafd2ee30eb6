//! Icon normalization (wire contract).
//!
//! Any icon string stored in the catalog is one of: emoji text, an
//! absolute URL, a path beginning with `/`, or bare base64 (> 20 chars).
//! Bare base64 is surfaced as a `data:image/png;base64,` URI.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IconType {
    Emoji,
    Image,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedIcon {
    pub icon: String,
    pub icon_type: IconType,
}

/// Bare base64 heuristic: longer than 20 chars, body of [A-Za-z0-9+/]
/// with up to two trailing `=` pads.
fn looks_like_base64(s: &str) -> bool {
    if s.len() <= 20 {
        return false;
    }
    let trimmed = s.trim_end_matches('=');
    if s.len() - trimmed.len() > 2 {
        return false;
    }
    !trimmed.is_empty()
        && trimmed
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/')
}

/// Normalize a raw catalog icon string.
///
/// Relative paths get the object-store prefix prepended when configured.
pub fn normalize_icon(raw: &str, object_store_prefix: Option<&str>) -> NormalizedIcon {
    let raw = raw.trim();

    if raw.starts_with("http://") || raw.starts_with("https://") || raw.starts_with("data:") {
        return NormalizedIcon {
            icon: raw.to_string(),
            icon_type: IconType::Image,
        };
    }

    if raw.starts_with('/') {
        let icon = match object_store_prefix {
            Some(prefix) => format!("{}{}", prefix.trim_end_matches('/'), raw),
            None => raw.to_string(),
        };
        return NormalizedIcon {
            icon,
            icon_type: IconType::Image,
        };
    }

    if looks_like_base64(raw) {
        return NormalizedIcon {
            icon: format!("data:image/png;base64,{}", raw),
            icon_type: IconType::Image,
        };
    }

    NormalizedIcon {
        icon: raw.to_string(),
        icon_type: IconType::Emoji,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emoji_passes_through() {
        let n = normalize_icon("🥩", None);
        assert_eq!(n.icon, "🥩");
        assert_eq!(n.icon_type, IconType::Emoji);
    }

    #[test]
    fn absolute_url_is_image() {
        let n = normalize_icon("https://cdn.example.com/badge.png", None);
        assert_eq!(n.icon, "https://cdn.example.com/badge.png");
        assert_eq!(n.icon_type, IconType::Image);
    }

    #[test]
    fn relative_path_gets_prefix() {
        let n = normalize_icon("/icons/coin.png", Some("https://store.example.com/assets/"));
        assert_eq!(n.icon, "https://store.example.com/assets/icons/coin.png");
        assert_eq!(n.icon_type, IconType::Image);

        let bare = normalize_icon("/icons/coin.png", None);
        assert_eq!(bare.icon, "/icons/coin.png");
        assert_eq!(bare.icon_type, IconType::Image);
    }

    #[test]
    fn bare_base64_becomes_data_uri() {
        let payload = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAAB";
        let n = normalize_icon(payload, None);
        assert_eq!(n.icon, format!("data:image/png;base64,{}", payload));
        assert_eq!(n.icon_type, IconType::Image);
    }

    #[test]
    fn short_ascii_stays_emoji() {
        // 20 chars or fewer never triggers the base64 heuristic.
        let n = normalize_icon("beefcoin", None);
        assert_eq!(n.icon_type, IconType::Emoji);
    }

    #[test]
    fn over_padded_string_stays_emoji() {
        let n = normalize_icon("aaaaaaaaaaaaaaaaaaaaaa====", None);
        assert_eq!(n.icon_type, IconType::Emoji);
    }
}
