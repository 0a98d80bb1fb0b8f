//! 車名・トラック名の正規化テーブル
//!
//! マーケットプレイス固有の名前をシミュレータ側の正規名に変換する。
//! テーブルはユーザーが編集するJSONで、未登録の名前はそのまま使われる。

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ScraperError;

/// 変換テーブル (キーは大文字小文字を区別する)
pub type MappingTable = HashMap<String, String>;

/// 変換結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    pub mapped: String,
    pub was_mapped: bool,
}

/// 名前を変換する。未登録なら元の名前を返し `was_mapped = false`。
pub fn lookup(name: &str, table: &MappingTable) -> Mapping {
    match table.get(name) {
        Some(canonical) => Mapping {
            mapped: canonical.clone(),
            was_mapped: true,
        },
        None => Mapping {
            mapped: name.to_string(),
            was_mapped: false,
        },
    }
}

/// 車・トラックの変換テーブル一式
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingTables {
    #[serde(default)]
    pub car: MappingTable,
    #[serde(default)]
    pub track: MappingTable,
}

impl MappingTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(json: &str) -> Result<Self, ScraperError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ScraperError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn with_car(mut self, source: impl Into<String>, canonical: impl Into<String>) -> Self {
        self.car.insert(source.into(), canonical.into());
        self
    }

    pub fn with_track(mut self, source: impl Into<String>, canonical: impl Into<String>) -> Self {
        self.track.insert(source.into(), canonical.into());
        self
    }

    pub fn car(&self, name: &str) -> Mapping {
        lookup(name, &self.car)
    }

    pub fn track(&self, name: &str) -> Mapping {
        lookup(name, &self.track)
    }
}
