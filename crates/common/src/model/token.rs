// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Media attached to a token. A token with a `video` asset is what routes a
/// player scan into the video queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaAssets {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<String>,
}

/// One entry in the static token catalog. Read-only at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenDef {
    pub id: String,
    pub value: i64,
    pub memory_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_multiplier: Option<i64>,
    #[serde(default)]
    pub media_assets: MediaAssets,
}

impl TokenDef {
    pub fn video_path(&self) -> Option<&str> {
        self.media_assets.video.as_deref()
    }
}

/// The full token → definition map for an event, loaded once at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenCatalog {
    tokens: HashMap<String, TokenDef>,
}

impl TokenCatalog {
    pub fn new(tokens: impl IntoIterator<Item = TokenDef>) -> Self {
        Self {
            tokens: tokens.into_iter().map(|t| (t.id.clone(), t)).collect(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let tokens: Vec<TokenDef> = serde_json::from_str(json)?;
        Ok(Self::new(tokens))
    }

    pub fn get(&self, token_id: &str) -> Option<&TokenDef> {
        self.tokens.get(token_id)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TokenDef> {
        self.tokens.values()
    }

    /// All tokens belonging to a group, in stable (id) order.
    pub fn group_members(&self, group_id: &str) -> Vec<&TokenDef> {
        let mut members: Vec<_> = self
            .tokens
            .values()
            .filter(|t| t.group_id.as_deref() == Some(group_id))
            .collect();
        members.sort_by(|a, b| a.id.cmp(&b.id));
        members
    }

    /// Sum of the values of every token in a group.
    pub fn group_value(&self, group_id: &str) -> i64 {
        self.group_members(group_id).iter().map(|t| t.value).sum()
    }

    /// The multiplier for a group, taken from any member that declares one.
    pub fn group_multiplier(&self, group_id: &str) -> i64 {
        self.group_members(group_id)
            .iter()
            .find_map(|t| t.group_multiplier)
            .unwrap_or(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn catalog() -> TokenCatalog {
        TokenCatalog::new([
            TokenDef {
                id: "grp1".to_string(),
                value: 1000,
                memory_type: "Personal".to_string(),
                group_id: Some("Marcus Sucks".to_string()),
                group_multiplier: Some(2),
                media_assets: MediaAssets::default(),
            },
            TokenDef {
                id: "grp2".to_string(),
                value: 2000,
                memory_type: "Personal".to_string(),
                group_id: Some("Marcus Sucks".to_string()),
                group_multiplier: Some(2),
                media_assets: MediaAssets::default(),
            },
            TokenDef {
                id: "solo".to_string(),
                value: 500,
                memory_type: "Technical".to_string(),
                group_id: None,
                group_multiplier: None,
                media_assets: MediaAssets::default(),
            },
        ])
    }

    #[test]
    fn group_value_sums_members() {
        let catalog = catalog();
        assert_eq!(catalog.group_value("Marcus Sucks"), 3000);
        assert_eq!(catalog.group_multiplier("Marcus Sucks"), 2);
        assert_eq!(catalog.group_members("Marcus Sucks").len(), 2);
    }

    #[test]
    fn parses_catalog_json() {
        let json = r#"[
            {"id": "jaw001", "value": 500, "memoryType": "Personal",
             "mediaAssets": {"video": "vid1.mp4"}}
        ]"#;
        let catalog = TokenCatalog::from_json(json).unwrap();
        let token = catalog.get("jaw001").unwrap();
        assert_eq!(token.value, 500);
        assert_eq!(token.video_path(), Some("vid1.mp4"));
    }
}
