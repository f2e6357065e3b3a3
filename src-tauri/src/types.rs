use serde::{Deserialize, Serialize};
use std::sync::Arc;

// セッションの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Empty,   // 画像無し
    Loaded,  // 画像を保持（識別前または識別済み）
}

// ナビゲーションで選べる画面
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum View {
    #[default]
    Identification,
    ModelPerformance,
}

impl std::fmt::Display for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            View::Identification => write!(f, "Identification"),
            View::ModelPerformance => write!(f, "ModelPerformance"),
        }
    }
}

impl std::str::FromStr for View {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Identification" | "Identifikasi" => Ok(View::Identification),
            "ModelPerformance" | "Performa Model" => Ok(View::ModelPerformance),
            other => Err(format!("不明な画面です: {}", other)),
        }
    }
}

/// アップロードされた画像
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub file_name: String,
    pub bytes: Arc<[u8]>,
    /// アップロードごとに増える番号（識別結果の対応付けに使う）
    pub upload_id: u64,
}

/// 受け付けるファイル拡張子
pub const ACCEPTED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];
