//! アプリケーション設定管理モジュール
//!
//! 計算デバイス、モデルの取得元、評価画像の場所などをJSON形式で保存・読み込みします。
//! 設定ファイルが無い場合は組み込みのデフォルト値を使用します。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::LeafResult;
use crate::model::artifact::RemoteModelReference;

/// Google Drive上の学習済みモデルのファイルID
///
/// このIDが指すのはKeras形式（.keras）の重みで、このアプリでは読み込めません。
/// 取得時に形式の不一致としてダウンロードエラーになります。
/// 変換済みのバンドル（metadata.json と model.bin を含む tar.gz）を
/// `config.json` の `model.model_id` か `model.download_url` で指定してください。
pub const DEFAULT_MODEL_ID: &str = "1XIdB6g1TnY4OmFbY2XbkwGawP7a-tzyr";

/// ローカルにキャッシュするモデルファイル
pub const DEFAULT_MODEL_PATH: &str = "model_leaf_classifier.tar.gz";

/// 評価結果の画像ファイル名
pub const CONFUSION_MATRIX_FILE: &str = "conf_matrix.png";
pub const CLASSIFICATION_REPORT_FILE: &str = "classification_report.png";

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    Wgpu,
    /// NdArray (CPU) バックエンド
    #[default]
    Cpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

impl std::str::FromStr for DeviceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" | "ndarray" => Ok(DeviceType::Cpu),
            "wgpu" | "gpu" => Ok(DeviceType::Wgpu),
            other => Err(format!("不明なバックエンドです: {}", other)),
        }
    }
}

/// モデル設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// リモートストア上のモデルID
    pub model_id: String,
    /// ダウンロードURLの上書き（未指定ならGoogle Driveの直接ダウンロード）
    #[serde(default)]
    pub download_url: Option<String>,
    /// ローカルのモデルファイルのパス
    pub model_path: String,
    /// ダウンロードのタイムアウト（秒）
    #[serde(default = "default_download_timeout")]
    pub download_timeout_secs: u64,
}

fn default_download_timeout() -> u64 {
    600
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            download_url: None,
            model_path: DEFAULT_MODEL_PATH.to_string(),
            download_timeout_secs: default_download_timeout(),
        }
    }
}

/// 評価結果表示の設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSettings {
    /// 評価画像を置くディレクトリ
    pub artifact_dir: String,
    pub confusion_matrix_file: String,
    pub classification_report_file: String,
}

impl Default for PerformanceSettings {
    fn default() -> Self {
        Self {
            artifact_dir: ".".to_string(),
            confusion_matrix_file: CONFUSION_MATRIX_FILE.to_string(),
            classification_report_file: CLASSIFICATION_REPORT_FILE.to_string(),
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// 計算デバイスの種類
    #[serde(default)]
    pub device_type: DeviceType,
    /// モデル設定
    #[serde(default)]
    pub model: ModelSettings,
    /// 評価結果表示の設定
    #[serde(default)]
    pub performance: PerformanceSettings,
}

/// プロジェクトルートからの相対パスを解決する
///
/// 開発時は src-tauri がカレントディレクトリになるため、その場合は親ディレクトリを基準にします。
pub fn resolve_project_path<P: AsRef<Path>>(path: P) -> PathBuf {
    let path = path.as_ref();
    if path.is_absolute() {
        return path.to_path_buf();
    }

    let current = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let project_root = if current.ends_with("src-tauri") {
        current.parent().map(Path::to_path_buf).unwrap_or(current)
    } else {
        current
    };
    project_root.join(path)
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        // src-tauriディレクトリの監視を避けるため、プロジェクトルートに保存
        resolve_project_path("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// 指定パスから設定を読み込む、存在しないか壊れている場合はデフォルト設定を返す
    pub fn load_or_default_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            info!("[Config] 設定ファイルが存在しません。デフォルト設定を使用します");
            return Self::default();
        }

        match Self::load(path) {
            Ok(config) => {
                info!("[Config] 設定ファイルを読み込みました: {}", path.display());
                config
            }
            Err(e) => {
                warn!(
                    "[Config] 設定ファイルの読み込みに失敗しました ({}): {}。デフォルト設定を使用します",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// デフォルトパスから設定を読み込む
    pub fn load_or_default() -> Self {
        Self::load_or_default_from(Self::default_path())
    }

    /// 指定パスから設定を読み込む、ファイルが無い場合はデフォルト設定を書き出す
    pub fn load_or_init<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if path.exists() {
            return Self::load_or_default_from(path);
        }

        let config = Self::default();
        match config.save(path) {
            Ok(()) => info!("[Config] デフォルト設定を書き出しました: {}", path.display()),
            Err(e) => warn!("[Config] デフォルト設定の書き出しに失敗しました ({}): {}", path.display(), e),
        }
        config
    }

    /// 組み込みのモデル参照（Keras形式）をそのまま使っているか
    pub fn uses_builtin_model_reference(&self) -> bool {
        self.model.model_id == DEFAULT_MODEL_ID && self.model.download_url.is_none()
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// リモートのモデル参照
    pub fn remote_reference(&self) -> LeafResult<RemoteModelReference> {
        match &self.model.download_url {
            Some(url) => Ok(RemoteModelReference::new(&self.model.model_id, url)),
            None => RemoteModelReference::google_drive(&self.model.model_id),
        }
    }

    /// モデルファイルの解決済みパス
    pub fn model_path(&self) -> PathBuf {
        resolve_project_path(&self.model.model_path)
    }

    /// 評価画像ディレクトリの解決済みパス
    pub fn artifact_dir(&self) -> PathBuf {
        resolve_project_path(&self.performance.artifact_dir)
    }

    /// 設定情報をログに出力
    pub fn display(&self) {
        info!("=== アプリケーション設定 ===");
        info!("計算デバイス: {}", self.device_type);
        info!("モデルID: {}", self.model.model_id);
        info!("モデルパス: {}", self.model.model_path);
        info!("ダウンロードタイムアウト: {}秒", self.model.download_timeout_secs);
        info!("評価画像ディレクトリ: {}", self.performance.artifact_dir);
    }
}
