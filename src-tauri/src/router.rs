//! 画面ごとの表示内容の組み立て
//!
//! 識別画面はセッションのスナップショットを、評価画面は評価画像の有無を確認して返します。
//! 評価画面はモデルにもセッションにも触れないため、モデルの取得に失敗していても表示できます。

use std::fs;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use tracing::{debug, warn};

use crate::ml::Prediction;
use crate::model::AppConfig;
use crate::session::Session;
use crate::types::{SessionState, View};

/// 画像が無いときの説明文
const NO_IMAGE_TEXT: &str = "Belum ada gambar yang diupload.";

/// 識別前に表示する説明文
const IDENTIFY_HINT: &str = "Unggah gambar daun lalu tekan tombol \"Identifikasi\".";

/// 識別画面の表示内容
#[derive(Debug, Clone, Serialize)]
pub struct IdentificationView {
    pub state: SessionState,
    /// アップロード欄の再生成に使うキー
    pub uploader_key: u64,
    pub file_name: Option<String>,
    /// プレビュー用のdata URL
    pub preview: Option<String>,
    pub result: Option<Prediction>,
    pub message: Option<String>,
}

/// 評価画像1枚分
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceArtifact {
    pub title: String,
    pub caption: String,
    pub file_name: String,
    pub image: Option<String>,
    pub warning: Option<String>,
}

impl PerformanceArtifact {
    pub fn is_available(&self) -> bool {
        self.image.is_some()
    }
}

/// 評価画面の表示内容
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceView {
    pub artifacts: Vec<PerformanceArtifact>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "view", content = "payload")]
pub enum ViewPayload {
    Identification(IdentificationView),
    ModelPerformance(PerformanceView),
}

struct ArtifactEntry {
    title: &'static str,
    caption: &'static str,
    file_name: String,
}

/// 画面の振り分け
#[derive(Debug, Clone)]
pub struct ViewRouter {
    artifact_dir: PathBuf,
    confusion_matrix_file: String,
    classification_report_file: String,
}

impl ViewRouter {
    pub fn new<P: Into<PathBuf>>(
        artifact_dir: P,
        confusion_matrix_file: impl Into<String>,
        classification_report_file: impl Into<String>,
    ) -> Self {
        Self {
            artifact_dir: artifact_dir.into(),
            confusion_matrix_file: confusion_matrix_file.into(),
            classification_report_file: classification_report_file.into(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.artifact_dir(),
            config.performance.confusion_matrix_file.clone(),
            config.performance.classification_report_file.clone(),
        )
    }

    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    /// 選択された画面の表示内容を返す
    pub fn route(&self, view: View, session: &Session) -> ViewPayload {
        match view {
            View::Identification => ViewPayload::Identification(identification_view(session)),
            View::ModelPerformance => ViewPayload::ModelPerformance(self.performance_view()),
        }
    }

    /// 評価画面
    pub fn performance_view(&self) -> PerformanceView {
        let entries = [
            ArtifactEntry {
                title: "Confusion Matrix",
                caption: "Confusion Matrix",
                file_name: self.confusion_matrix_file.clone(),
            },
            ArtifactEntry {
                title: "Classification Report",
                caption: "Classification Report",
                file_name: self.classification_report_file.clone(),
            },
        ];

        PerformanceView {
            artifacts: entries.into_iter().map(|entry| self.load_artifact(entry)).collect(),
        }
    }

    fn load_artifact(&self, entry: ArtifactEntry) -> PerformanceArtifact {
        let path = self.artifact_dir.join(&entry.file_name);
        let missing = format!(
            "File '{}' tidak ditemukan di folder. Silakan cek nama file dan lokasi.",
            entry.file_name
        );

        let (image, warning) = if !path.is_file() {
            debug!("[Router] 評価画像がありません: {}", path.display());
            (None, Some(missing))
        } else {
            match fs::read(&path) {
                Ok(bytes) => (Some(data_url(&entry.file_name, &bytes)), None),
                Err(e) => {
                    warn!("[Router] 評価画像の読み込みに失敗しました ({}): {}", path.display(), e);
                    (None, Some(missing))
                }
            }
        };

        PerformanceArtifact {
            title: entry.title.to_string(),
            caption: entry.caption.to_string(),
            file_name: entry.file_name,
            image,
            warning,
        }
    }
}

/// 識別画面
pub fn identification_view(session: &Session) -> IdentificationView {
    let image = session.image();
    let result = session.last_prediction().cloned();
    let message = match (session.state(), &result) {
        (SessionState::Empty, _) => Some(NO_IMAGE_TEXT.to_string()),
        (SessionState::Loaded, None) => Some(IDENTIFY_HINT.to_string()),
        (SessionState::Loaded, Some(_)) => None,
    };

    IdentificationView {
        state: session.state(),
        uploader_key: session.uploader_key(),
        file_name: image.map(|i| i.file_name.clone()),
        preview: image.map(|i| data_url(&i.file_name, &i.bytes)),
        result,
        message,
    }
}

/// 画像バイト列をdata URLに変換
pub fn data_url(file_name: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type(file_name, bytes), STANDARD.encode(bytes))
}

fn mime_type(file_name: &str, bytes: &[u8]) -> &'static str {
    match image::guess_format(bytes) {
        Ok(image::ImageFormat::Png) => "image/png",
        Ok(image::ImageFormat::Jpeg) => "image/jpeg",
        _ => {
            let lower = file_name.to_ascii_lowercase();
            if lower.ends_with(".png") {
                "image/png"
            } else if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
                "image/jpeg"
            } else {
                "application/octet-stream"
            }
        }
    }
}
