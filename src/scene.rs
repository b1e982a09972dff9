//! Scene template catalog.

use crate::error::{Result, SceneGenError};
use serde::Serialize;

/// A named setting with the fixed instruction sent as the base prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SceneTemplate {
    /// ASCII identifier used on the command line.
    pub key: &'static str,
    /// Display name.
    pub label: &'static str,
    /// Instruction text placed at the start of every prompt.
    pub instruction: &'static str,
}

/// All available scenes, in display order. The first entry is the default.
pub const SCENE_TEMPLATES: &[SceneTemplate] = &[
    SceneTemplate {
        key: "cafe",
        label: "咖啡馆",
        instruction: "将以下人物放置在咖啡馆中，生成一张图片",
    },
    SceneTemplate {
        key: "office",
        label: "办公室",
        instruction: "将以下人物放置在现代化办公室中，生成一张图片",
    },
    SceneTemplate {
        key: "beach",
        label: "海滩",
        instruction: "将以下人物放置在海滩上，生成一张图片",
    },
    SceneTemplate {
        key: "park",
        label: "公园",
        instruction: "将以下人物放置在美丽的公园中，生成一张图片",
    },
    SceneTemplate {
        key: "library",
        label: "图书馆",
        instruction: "将以下人物放置在安静的图书馆中，生成一张图片",
    },
    SceneTemplate {
        key: "restaurant",
        label: "餐厅",
        instruction: "将以下人物放置在优雅的餐厅中，生成一张图片",
    },
    SceneTemplate {
        key: "gym",
        label: "健身房",
        instruction: "将以下人物放置在健身房中，生成一张图片",
    },
    SceneTemplate {
        key: "mall",
        label: "购物中心",
        instruction: "将以下人物放置在购物中心中，生成一张图片",
    },
    SceneTemplate {
        key: "school",
        label: "学校",
        instruction: "将以下人物放置在学校教室中，生成一张图片",
    },
    SceneTemplate {
        key: "hospital",
        label: "医院",
        instruction: "将以下人物放置在医院中，生成一张图片",
    },
    SceneTemplate {
        key: "airport",
        label: "机场",
        instruction: "将以下人物放置在机场候机厅中，生成一张图片",
    },
    SceneTemplate {
        key: "hotel",
        label: "酒店",
        instruction: "将以下人物放置在豪华酒店中，生成一张图片",
    },
];

impl SceneTemplate {
    /// Returns every scene template.
    pub fn all() -> &'static [SceneTemplate] {
        SCENE_TEMPLATES
    }

    /// Finds a scene by key (case-insensitive) or exact label.
    pub fn find(name: &str) -> Option<&'static SceneTemplate> {
        let name = name.trim();
        SCENE_TEMPLATES
            .iter()
            .find(|s| s.key.eq_ignore_ascii_case(name) || s.label == name)
    }

    /// Like [`SceneTemplate::find`], but an unknown name is an error listing the valid keys.
    pub fn lookup(name: &str) -> Result<&'static SceneTemplate> {
        Self::find(name).ok_or_else(|| {
            let keys: Vec<&str> = SCENE_TEMPLATES.iter().map(|s| s.key).collect();
            SceneGenError::InvalidRequest(format!(
                "unknown scene '{}'. Valid scenes: {}",
                name,
                keys.join(", ")
            ))
        })
    }
}

impl Default for SceneTemplate {
    fn default() -> Self {
        SCENE_TEMPLATES[0]
    }
}

impl std::fmt::Display for SceneTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.label, self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_has_twelve_unique_scenes() {
        assert_eq!(SCENE_TEMPLATES.len(), 12);
        for (i, a) in SCENE_TEMPLATES.iter().enumerate() {
            for b in &SCENE_TEMPLATES[i + 1..] {
                assert_ne!(a.key, b.key);
                assert_ne!(a.label, b.label);
            }
        }
    }

    #[test]
    fn test_find_by_key_and_label() {
        assert_eq!(SceneTemplate::find("beach").unwrap().label, "海滩");
        assert_eq!(SceneTemplate::find("BEACH").unwrap().key, "beach");
        assert_eq!(SceneTemplate::find("机场").unwrap().key, "airport");
        assert_eq!(
            SceneTemplate::find(" office ").unwrap().instruction,
            "将以下人物放置在现代化办公室中，生成一张图片"
        );
        assert!(SceneTemplate::find("moon").is_none());
    }

    #[test]
    fn test_lookup_unknown_lists_keys() {
        let err = SceneTemplate::lookup("moon").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("moon"));
        assert!(msg.contains("cafe"));
        assert!(msg.contains("hotel"));
    }

    #[test]
    fn test_default_is_cafe() {
        assert_eq!(SceneTemplate::default().key, "cafe");
        assert_eq!(SceneTemplate::default().to_string(), "咖啡馆 (cafe)");
    }
}
