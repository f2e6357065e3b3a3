#![recursion_limit = "256"]
mod types;
pub mod error;
pub mod session;
pub mod router;

// 識別機能のモジュール
pub mod ml;
pub mod model;

#[cfg(feature = "desktop")]
mod commands;

pub use error::{LeafError, LeafResult};
pub use session::{Session, ValidatedUpload};
pub use router::{ViewPayload, ViewRouter};
pub use types::{SessionState, UploadedImage, View, ACCEPTED_EXTENSIONS};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ml::{ClassLabelSet, ImagePreprocessor};
use model::{AppConfig, ModelHandle};

/// アプリケーション全体で共有する状態
pub struct AppState {
    pub config: AppConfig,
    pub labels: ClassLabelSet,
    pub preprocessor: ImagePreprocessor,
    pub model: Arc<ModelHandle>,
    pub router: ViewRouter,
    sessions: Mutex<HashMap<String, Session>>, // ウィンドウラベル -> セッション
}

impl AppState {
    pub fn new(config: AppConfig) -> LeafResult<Self> {
        let model = Arc::new(ModelHandle::from_config(&config)?);
        Ok(Self::with_model(config, model))
    }

    pub fn with_model(config: AppConfig, model: Arc<ModelHandle>) -> Self {
        let router = ViewRouter::from_config(&config);
        Self {
            config,
            labels: ClassLabelSet::leaf_species(),
            preprocessor: ImagePreprocessor::default(),
            model,
            router,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// セッションを取得して処理する（無ければ作成）
    ///
    /// ロックは `f` の実行中だけ保持されます。
    pub fn with_session<R>(&self, key: &str, f: impl FnOnce(&mut Session) -> R) -> LeafResult<R> {
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| LeafError::State("セッションのロックが破損しています".to_string()))?;
        let session = sessions.entry(key.to_string()).or_default();
        Ok(f(session))
    }

    /// ウィンドウが閉じられたときにセッションを破棄
    pub fn drop_session(&self, key: &str) {
        if let Ok(mut sessions) = self.sessions.lock() {
            if sessions.remove(key).is_some() {
                tracing::debug!("[AppState] セッションを破棄しました: {}", key);
            }
        }
    }
}

/// ログ出力の初期化（RUST_LOGが無ければinfo）
pub fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // 二重初期化はテストなどで起こり得るので無視する
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(feature = "desktop")]
#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    use tauri::Manager;
    use tracing::{error, info, warn};

    init_logging();

    let config = AppConfig::load_or_init(AppConfig::default_path());
    config.display();

    let app_state = match AppState::new(config) {
        Ok(state) => state,
        Err(e) => {
            error!("[App] 初期化に失敗しました: {}", e);
            return;
        }
    };

    // 起動直後にバックグラウンドでモデルを準備しておく
    let warmup = app_state.model.clone();
    std::thread::spawn(move || match warmup.get_model() {
        Ok(model) => info!("[App] モデルの準備が完了しました ({})", model.device_type()),
        Err(e) => warn!("[App] モデルの準備に失敗しました: {}", e),
    });

    let result = tauri::Builder::default()
        .manage(app_state)
        .on_window_event(|window, event| {
            if let tauri::WindowEvent::Destroyed = event {
                let state: tauri::State<AppState> = window.state();
                state.drop_session(window.label());
            }
        })
        .invoke_handler(tauri::generate_handler![
            commands::navigate,
            commands::get_view,
            commands::submit_image,
            commands::clear_image,
            commands::identify_image,
            commands::get_model_status,
        ])
        .run(tauri::generate_context!());

    if let Err(e) = result {
        error!("[App] アプリケーションの実行エラー: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{ArtifactFetcher, ArtifactSource, DeviceType, RemoteModelReference};
    use std::io::Write;

    struct Unreachable;

    impl ArtifactSource for Unreachable {
        fn fetch(&self, reference: &RemoteModelReference, _dest: &mut dyn Write) -> LeafResult<u64> {
            Err(LeafError::download(&reference.url, "unreachable"))
        }
    }

    fn state() -> AppState {
        let dir = std::env::temp_dir().join("leaf_identifier_app_state_test");
        let model = ModelHandle::new(
            ArtifactFetcher::new(Box::new(Unreachable)),
            RemoteModelReference::new("x", "https://example.invalid/x"),
            dir.join("model.tar.gz"),
            DeviceType::Cpu,
        );
        AppState::with_model(AppConfig::default(), Arc::new(model))
    }

    #[test]
    fn test_sessions_are_independent_per_window() {
        let state = state();
        state
            .with_session("main", |s| s.navigate(View::ModelPerformance))
            .unwrap();

        let main_view = state.with_session("main", |s| s.view()).unwrap();
        let other_view = state.with_session("second", |s| s.view()).unwrap();
        assert_eq!(main_view, View::ModelPerformance);
        assert_eq!(other_view, View::Identification);
    }

    #[test]
    fn test_poisoned_session_lock_is_state_error() {
        let state = state();
        std::thread::scope(|s| {
            let _ = s
                .spawn(|| state.with_session("main", |_| panic!("panic while holding the lock")))
                .join();
        });

        let err = state.with_session("main", |s| s.view()).unwrap_err();
        assert!(matches!(err, LeafError::State(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_drop_session_resets_state() {
        let state = state();
        state
            .with_session("main", |s| s.navigate(View::ModelPerformance))
            .unwrap();
        state.drop_session("main");
        let view = state.with_session("main", |s| s.view()).unwrap();
        assert_eq!(view, View::Identification);
    }
}
