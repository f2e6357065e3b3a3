//! 読み込み済みモデルのプロセス共有キャッシュ
//!
//! 最初の呼び出しでモデルファイルを確保（必要ならダウンロード）してデシリアライズし、
//! 以降は同じインスタンスを返します。同時に初回アクセスがあっても読み込みは1回だけ実行され、
//! 他の呼び出し元はその結果を待ちます。失敗した読み込みはキャッシュされません。

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use burn_ndarray::{NdArray, NdArrayDevice};
use burn_wgpu::{Wgpu, WgpuDevice};
use once_cell::sync::OnceCell;
use tracing::{info, warn};

use crate::error::{LeafError, LeafResult};
use crate::ml::{ClassLabelSet, InferenceEngine, Prediction, PreprocessedTensor};
use crate::model::artifact::{ArtifactFetcher, RemoteModelReference};
use crate::model::config::{AppConfig, DeviceType};
use crate::model::model_metadata::ModelMetadata;
use crate::model::model_storage::{load_model_with_metadata, print_metadata_info};

/// バックエンドごとの推論エンジン
pub enum LoadedModel {
    Cpu(InferenceEngine<NdArray>),
    Gpu(InferenceEngine<Wgpu>),
}

impl LoadedModel {
    pub fn classify(&self, tensor: &PreprocessedTensor, labels: &ClassLabelSet) -> LeafResult<Prediction> {
        match self {
            LoadedModel::Cpu(engine) => engine.classify(tensor, labels),
            LoadedModel::Gpu(engine) => engine.classify(tensor, labels),
        }
    }

    pub fn metadata(&self) -> &ModelMetadata {
        match self {
            LoadedModel::Cpu(engine) => engine.metadata(),
            LoadedModel::Gpu(engine) => engine.metadata(),
        }
    }

    pub fn device_type(&self) -> DeviceType {
        match self {
            LoadedModel::Cpu(_) => DeviceType::Cpu,
            LoadedModel::Gpu(_) => DeviceType::Wgpu,
        }
    }
}

/// セッション間で共有される読み込み済みモデル
///
/// 推論は排他的に実行されます。
pub struct SharedModel {
    inner: Mutex<LoadedModel>,
    metadata: ModelMetadata,
    device_type: DeviceType,
}

impl SharedModel {
    pub fn new(model: LoadedModel) -> Self {
        let metadata = model.metadata().clone();
        let device_type = model.device_type();
        Self {
            inner: Mutex::new(model),
            metadata,
            device_type,
        }
    }

    pub fn classify(&self, tensor: &PreprocessedTensor, labels: &ClassLabelSet) -> LeafResult<Prediction> {
        let model = self
            .inner
            .lock()
            .map_err(|_| LeafError::State("モデルのロックが破損しています".to_string()))?;
        model.classify(tensor, labels)
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }
}

/// モデルを一度だけ読み込んでキャッシュする
pub struct ModelHandle {
    cell: OnceCell<Arc<SharedModel>>,
    fetcher: ArtifactFetcher,
    reference: RemoteModelReference,
    model_path: PathBuf,
    device_type: DeviceType,
    // 直近の読み込み失敗（成功すると消える）
    last_error: Mutex<Option<String>>,
}

impl ModelHandle {
    pub fn new(
        fetcher: ArtifactFetcher,
        reference: RemoteModelReference,
        model_path: PathBuf,
        device_type: DeviceType,
    ) -> Self {
        Self {
            cell: OnceCell::new(),
            fetcher,
            reference,
            model_path,
            device_type,
            last_error: Mutex::new(None),
        }
    }

    /// 設定からHTTP取得元を使うハンドルを作る
    pub fn from_config(config: &AppConfig) -> LeafResult<Self> {
        let timeout = std::time::Duration::from_secs(config.model.download_timeout_secs);
        if config.uses_builtin_model_reference() && !config.model_path().exists() {
            warn!(
                "[ModelHandle] 組み込みのモデルIDはKeras形式のため読み込めません。config.json で tar.gz バンドルを指定してください"
            );
        }
        Ok(Self::new(
            ArtifactFetcher::http(timeout)?,
            config.remote_reference()?,
            config.model_path(),
            config.device_type,
        ))
    }

    /// 読み込み済みモデルを取得（初回のみダウンロードと読み込みを行う）
    pub fn get_model(&self) -> LeafResult<Arc<SharedModel>> {
        let result = self.cell.get_or_try_init(|| self.load()).map(Arc::clone);
        let error = result.as_ref().err().map(ToString::to_string);
        if let Ok(mut last_error) = self.last_error.lock() {
            *last_error = error;
        }
        result
    }

    /// 直近の読み込みエラー（未読み込みで失敗している場合のみ）
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|e| e.clone())
    }

    /// 既に読み込み済みかどうか
    pub fn is_loaded(&self) -> bool {
        self.cell.get().is_some()
    }

    pub fn model_path(&self) -> &PathBuf {
        &self.model_path
    }

    fn load(&self) -> LeafResult<Arc<SharedModel>> {
        info!("[ModelHandle] モデルを初期化しています ({})", self.device_type);

        let artifact = self
            .fetcher
            .ensure_local_model(&self.reference, &self.model_path)?;

        let (metadata, model_binary) = load_model_with_metadata(&artifact.path)
            .map_err(|e| LeafError::model_load(&artifact.path, format!("{:#}", e)))?;
        print_metadata_info(&metadata);

        let labels = ClassLabelSet::leaf_species();
        if metadata.class_labels.as_slice() != labels.as_slice() {
            warn!(
                "[ModelHandle] モデルのクラスラベルが組み込みのラベルと一致しません: {:?}",
                metadata.class_labels
            );
        }

        let model = match self.device_type {
            DeviceType::Cpu => InferenceEngine::from_bytes(metadata, model_binary, NdArrayDevice::Cpu)
                .map(LoadedModel::Cpu),
            DeviceType::Wgpu => InferenceEngine::from_bytes(metadata, model_binary, WgpuDevice::default())
                .map(LoadedModel::Gpu),
        }
        .map_err(|e| LeafError::model_load(&artifact.path, format!("モデル重みの読み込みエラー: {:?}", e)))?;

        info!("[ModelHandle] モデルの読み込みが完了しました");
        Ok(Arc::new(SharedModel::new(model)))
    }
}
