//! 識別フローのエラー定義
//!
//! 致命的なエラー（ダウンロード・モデル読み込み・推論設定の不整合）と、
//! ユーザーに提示して継続できるエラー（画像デコード失敗）を区別します。

use std::path::PathBuf;

/// 葉識別アプリのエラー
#[derive(Debug, thiserror::Error)]
pub enum LeafError {
    /// リモートからのモデル取得に失敗、または取得後のファイルが不正
    #[error("モデルのダウンロードに失敗しました ({url}): {message}")]
    Download { url: String, message: String },

    /// モデルアーティファクトのデシリアライズに失敗
    #[error("モデルの読み込みに失敗しました ({path:?}): {message}")]
    ModelLoad { path: PathBuf, message: String },

    /// アップロード画像のデコードに失敗
    #[error("画像を読み込めません: {0}")]
    Decode(String),

    /// モデル出力とラベル数の不一致など、推論設定の不整合
    #[error("推論エラー: {0}")]
    Inference(String),

    /// 共有状態のロック破損など、アプリ内部の状態異常
    #[error("内部状態エラー: {0}")]
    State(String),
}

impl LeafError {
    pub fn download(url: impl Into<String>, message: impl std::fmt::Display) -> Self {
        LeafError::Download {
            url: url.into(),
            message: message.to_string(),
        }
    }

    pub fn model_load(path: impl Into<PathBuf>, message: impl std::fmt::Display) -> Self {
        LeafError::ModelLoad {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// 識別フローを使用不能にするエラーかどうか
    ///
    /// デコードエラーのみユーザー操作で回復可能です。
    pub fn is_fatal(&self) -> bool {
        !matches!(self, LeafError::Decode(_))
    }
}

impl From<image::ImageError> for LeafError {
    fn from(err: image::ImageError) -> Self {
        LeafError::Decode(err.to_string())
    }
}

pub type LeafResult<T> = Result<T, LeafError>;
