//! モデルメタデータの定義と永続化
//!
//! tar.gz形式でモデルの重みと一緒に保存され、推論時のネットワーク復元に使用します。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelMetadata {
    /// モデル名
    pub model_name: String,

    /// クラスラベル（出力層のインデックス順）
    /// 例: ["Belimbing Wuluh", "Daun Jeruk", ...]
    pub class_labels: Vec<String>,

    /// 出力クラス数
    pub num_classes: usize,

    /// モデル入力サイズ（正方形、通常299）
    pub image_size: usize,

    /// 最初の畳み込み層のチャネル数（以降の層は2倍ずつ増える）
    pub base_channels: usize,

    /// 全結合層の前の適応プーリング出力サイズ
    pub pooled_size: usize,

    /// モデルの作成時刻（ISO8601形式）
    pub created_at: String,
}

impl ModelMetadata {
    /// 新しいメタデータを作成
    pub fn new(
        model_name: impl Into<String>,
        class_labels: Vec<String>,
        image_size: usize,
        base_channels: usize,
        pooled_size: usize,
    ) -> Self {
        let created_at = chrono::Local::now().to_rfc3339();
        let num_classes = class_labels.len();

        Self {
            model_name: model_name.into(),
            class_labels,
            num_classes,
            image_size,
            base_channels,
            pooled_size,
            created_at,
        }
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize metadata from JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_counts_classes() {
        let meta = ModelMetadata::new("leaf", vec!["a".into(), "b".into()], 299, 8, 4);
        assert_eq!(meta.num_classes, 2);
        assert!(!meta.created_at.is_empty());
    }

    #[test]
    fn test_json_keeps_label_order() {
        let labels: Vec<String> = ["Daun Sirih", "Belimbing Wuluh", "Jambu Biji"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let meta = ModelMetadata::new("leaf", labels.clone(), 299, 8, 4);
        let parsed = ModelMetadata::from_json_string(&meta.to_json_string().unwrap()).unwrap();
        assert_eq!(parsed.class_labels, labels);
    }

    #[test]
    fn test_missing_field_is_error() {
        assert!(ModelMetadata::from_json_string(r#"{ "model_name": "x" }"#).is_err());
    }
}
