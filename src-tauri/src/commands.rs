//! フロントエンドから呼ばれるTauriコマンド
//!
//! セッションはウィンドウラベルごとに分かれます。
//! 識別はブロッキングスレッドで実行し、セッションのロックは推論中に保持しません。

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use tauri::State;
use tracing::{error, warn};

use crate::error::LeafError;
use crate::ml::Prediction;
use crate::router::ViewPayload;
use crate::session::{run_identification, ValidatedUpload};
use crate::types::View;
use crate::AppState;

/// モデルの準備状況
#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    pub loaded: bool,
    pub device: String,
    pub model_path: String,
    pub model_on_disk: bool,
    /// 直近の読み込み失敗
    pub error: Option<String>,
}

fn to_message(e: LeafError) -> String {
    if e.is_fatal() {
        error!("[Command] {}", e);
    } else {
        warn!("[Command] {}", e);
    }
    e.to_string()
}

fn render(state: &AppState, label: &str) -> Result<ViewPayload, String> {
    state
        .with_session(label, |session| state.router.route(session.view(), session))
        .map_err(to_message)
}

#[tauri::command]
pub fn navigate(view: String, window: tauri::Window, state: State<AppState>) -> Result<ViewPayload, String> {
    let view: View = view.parse()?;
    state
        .with_session(window.label(), |session| session.navigate(view))
        .map_err(to_message)?;
    render(&state, window.label())
}

#[tauri::command]
pub fn get_view(window: tauri::Window, state: State<AppState>) -> Result<ViewPayload, String> {
    render(&state, window.label())
}

/// 画像のアップロード（内容はbase64）
#[tauri::command]
pub fn submit_image(
    file_name: String,
    data: String,
    window: tauri::Window,
    state: State<AppState>,
) -> Result<ViewPayload, String> {
    let bytes = STANDARD
        .decode(data.as_bytes())
        .map_err(|e| to_message(LeafError::Decode(format!("base64のデコードエラー: {}", e))))?;

    // デコードはロックの外で行う
    let upload = ValidatedUpload::new(&file_name, bytes).map_err(to_message)?;
    state
        .with_session(window.label(), |session| session.submit(upload))
        .map_err(to_message)?;
    render(&state, window.label())
}

#[tauri::command]
pub fn clear_image(window: tauri::Window, state: State<'_, AppState>) -> Result<ViewPayload, String> {
    state
        .with_session(window.label(), |session| session.clear())
        .map_err(to_message)?;
    render(&state, window.label())
}

/// 識別を実行（画像が無ければ何もしない）
#[tauri::command]
pub async fn identify_image(
    window: tauri::Window,
    state: State<'_, AppState>,
) -> Result<Option<Prediction>, String> {
    let label = window.label().to_string();

    let Some(request) = state
        .with_session(&label, |session| session.identify_request())
        .map_err(to_message)?
    else {
        return Ok(None);
    };

    let handle = state.model.clone();
    let preprocessor = state.preprocessor.clone();
    let labels = state.labels.clone();
    let upload_id = request.upload_id;

    let prediction = tokio::task::spawn_blocking(move || {
        let model = handle.get_model()?;
        run_identification(&request, &preprocessor, &model, &labels)
    })
    .await
    .map_err(|e| format!("識別タスクの実行エラー: {}", e))?
    .map_err(to_message)?;

    let recorded = state
        .with_session(&label, |session| session.record_prediction(upload_id, prediction.clone()))
        .map_err(to_message)?;

    Ok(recorded.then_some(prediction))
}

#[tauri::command]
pub fn get_model_status(state: State<AppState>) -> ModelStatus {
    let path = state.model.model_path();
    ModelStatus {
        loaded: state.model.is_loaded(),
        device: state.config.device_type.to_string(),
        model_path: path.display().to_string(),
        model_on_disk: path.is_file(),
        error: state.model.last_error(),
    }
}
