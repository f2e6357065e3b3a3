//! 識別画面のセッション状態
//!
//! Empty（画像無し）と Loaded（画像あり）の2状態を持ち、
//! アップロード・クリア・識別の操作で遷移します。
//! ウィンドウごとに1つのセッションを持ち、グローバルな状態は使いません。

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{LeafError, LeafResult};
use crate::ml::{decode_image, ClassLabelSet, ImagePreprocessor, Prediction};
use crate::model::SharedModel;
use crate::types::{SessionState, UploadedImage, View, ACCEPTED_EXTENSIONS};

/// 識別処理に渡す入力（ロックの外で処理するために切り出したもの）
#[derive(Debug, Clone)]
pub struct IdentifyRequest {
    pub upload_id: u64,
    pub bytes: Arc<[u8]>,
}

/// デコードまで確認済みのアップロード
///
/// 検証はセッションのロック外で行い、結果だけを `Session::submit` に渡します。
#[derive(Debug, Clone)]
pub struct ValidatedUpload {
    file_name: String,
    bytes: Vec<u8>,
}

impl ValidatedUpload {
    /// 拡張子とJPEG/PNGとしてのデコードを確認する
    pub fn new(file_name: &str, bytes: Vec<u8>) -> LeafResult<Self> {
        if !has_accepted_extension(file_name) {
            return Err(LeafError::Decode(format!(
                "対応していないファイルです: {} (jpg, jpeg, png のみ)",
                file_name
            )));
        }
        decode_image(&bytes)?;

        Ok(Self {
            file_name: file_name.to_string(),
            bytes,
        })
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }
}

pub struct Session {
    // 状態管理
    state: SessionState,
    image: Option<UploadedImage>,
    last_prediction: Option<Prediction>,

    // アップロード欄をリセットするためのキー（クリアごとに1増える）
    uploader_key: u64,
    next_upload_id: u64,

    // 現在の画面
    view: View,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: SessionState::Empty,
            image: None,
            last_prediction: None,
            uploader_key: 0,
            next_upload_id: 1,
            view: View::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn image(&self) -> Option<&UploadedImage> {
        self.image.as_ref()
    }

    pub fn uploader_key(&self) -> u64 {
        self.uploader_key
    }

    pub fn last_prediction(&self) -> Option<&Prediction> {
        self.last_prediction.as_ref()
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn navigate(&mut self, view: View) {
        if self.view != view {
            debug!("[Session] 画面切り替え: {} -> {}", self.view, view);
        }
        self.view = view;
    }

    /// 画像をアップロード（保持中の画像は置き換える）
    ///
    /// JPEG/PNGとしてデコードできない場合は拒否し、状態は変えません。
    pub fn submit_file(&mut self, file_name: &str, bytes: Vec<u8>) -> LeafResult<()> {
        let upload = ValidatedUpload::new(file_name, bytes)?;
        self.submit(upload);
        Ok(())
    }

    /// 検証済みの画像を保持する
    pub fn submit(&mut self, upload: ValidatedUpload) {
        let upload_id = self.next_upload_id;
        self.next_upload_id += 1;

        info!("[Session] 画像を受け付けました: {} (#{})", upload.file_name, upload_id);
        self.image = Some(UploadedImage {
            file_name: upload.file_name,
            bytes: upload.bytes.into(),
            upload_id,
        });
        self.last_prediction = None;
        self.state = SessionState::Loaded;
    }

    /// 画像をクリア
    ///
    /// 遷移した場合はtrue。Emptyでは何もしません。
    pub fn clear(&mut self) -> bool {
        if self.state != SessionState::Loaded {
            return false;
        }

        self.image = None;
        self.last_prediction = None;
        self.uploader_key += 1;
        self.state = SessionState::Empty;

        info!("[Session] 画像をクリアしました (uploader_key={})", self.uploader_key);
        true
    }

    /// 識別に必要な入力を取り出す（EmptyならNone）
    pub fn identify_request(&self) -> Option<IdentifyRequest> {
        match (self.state, &self.image) {
            (SessionState::Loaded, Some(image)) => Some(IdentifyRequest {
                upload_id: image.upload_id,
                bytes: image.bytes.clone(),
            }),
            _ => None,
        }
    }

    /// 識別結果を記録
    ///
    /// 計算中に画像がクリア・置換されていた場合は破棄してfalseを返します。
    pub fn record_prediction(&mut self, upload_id: u64, prediction: Prediction) -> bool {
        match &self.image {
            Some(image) if image.upload_id == upload_id => {
                self.last_prediction = Some(prediction);
                true
            }
            _ => {
                debug!("[Session] 古いアップロード(#{})の識別結果を破棄しました", upload_id);
                false
            }
        }
    }

    /// 識別を実行して結果を記録（Emptyでは何もしない）
    pub fn identify<F>(
        &mut self,
        preprocessor: &ImagePreprocessor,
        labels: &ClassLabelSet,
        model: F,
    ) -> LeafResult<Option<Prediction>>
    where
        F: FnOnce() -> LeafResult<Arc<SharedModel>>,
    {
        let Some(request) = self.identify_request() else {
            return Ok(None);
        };

        let model = model()?;
        let prediction = run_identification(&request, preprocessor, &model, labels)?;
        self.record_prediction(request.upload_id, prediction.clone());
        Ok(Some(prediction))
    }
}

/// 前処理から推論までを実行
pub fn run_identification(
    request: &IdentifyRequest,
    preprocessor: &ImagePreprocessor,
    model: &SharedModel,
    labels: &ClassLabelSet,
) -> LeafResult<Prediction> {
    let tensor = preprocessor.preprocess(&request.bytes)?;
    let prediction = model.classify(&tensor, labels)?;
    info!(
        "[Identify] #{} -> {} ({:.1}%)",
        request.upload_id,
        prediction.label,
        prediction.confidence * 100.0
    );
    Ok(prediction)
}

fn has_accepted_extension(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| ACCEPTED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
