//! モデル推論機能

use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder, RecorderError},
    tensor::{activation::softmax, backend::Backend, Tensor, TensorData},
};
use serde::Serialize;

use crate::error::{LeafError, LeafResult};
use crate::ml::ml_model::{ClassLabelSet, LeafClassifier, ModelConfig};
use crate::ml::preprocess::PreprocessedTensor;
use crate::model::ModelMetadata;

/// 識別結果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub label: String,
    pub class_index: usize,
    /// 選ばれたクラスの確率
    pub confidence: f32,
}

/// 最大値のインデックス（同値の場合は最初に現れたもの）
///
/// NaNは最大値として扱いません。
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        match best {
            Some((_, best_value)) if v <= best_value => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// 確率ベクトルからラベルを選ぶ
pub fn select_label(probabilities: &[f32], labels: &ClassLabelSet) -> LeafResult<Prediction> {
    if probabilities.len() != labels.len() {
        return Err(LeafError::Inference(format!(
            "モデル出力のクラス数 ({}) とラベル数 ({}) が一致しません",
            probabilities.len(),
            labels.len()
        )));
    }

    let class_index = argmax(probabilities)
        .ok_or_else(|| LeafError::Inference("モデル出力が有効な値を含みません".to_string()))?;
    let label = labels
        .get(class_index)
        .ok_or_else(|| LeafError::Inference(format!("クラスインデックス {} は範囲外です", class_index)))?;

    Ok(Prediction {
        label: label.to_string(),
        class_index,
        confidence: probabilities[class_index],
    })
}

/// 推論エンジン
pub struct InferenceEngine<B: Backend> {
    model: LeafClassifier<B>,
    metadata: ModelMetadata,
    device: B::Device,
    // 受け付ける入力の一辺
    input_size: usize,
}

impl<B: Backend> InferenceEngine<B> {
    /// メタデータと重みのバイナリから推論エンジンを初期化
    pub fn from_bytes(
        metadata: ModelMetadata,
        model_binary: Vec<u8>,
        device: B::Device,
    ) -> Result<Self, RecorderError> {
        let model_config = ModelConfig::new(metadata.num_classes)
            .with_image_size(metadata.image_size)
            .with_base_channels(metadata.base_channels)
            .with_pooled_size(metadata.pooled_size);

        let model = model_config.init::<B>(&device);

        // モデルの重みを復元
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let record = recorder.load(model_binary, &device)?;

        let model = model.load_record(record);

        Ok(Self {
            model,
            metadata,
            device,
            input_size: model_config.image_size,
        })
    }

    /// 学習済みモデルから推論エンジンを作る
    pub fn new(model: LeafClassifier<B>, metadata: ModelMetadata, device: B::Device) -> Self {
        let input_size = metadata.image_size;
        Self {
            model,
            metadata,
            device,
            input_size,
        }
    }

    /// 前処理済みテンソルのクラス確率を計算
    pub fn probabilities(&self, tensor: &PreprocessedTensor) -> LeafResult<Vec<f32>> {
        let shape = tensor.shape();
        let expected = [1, self.input_size, self.input_size, 3];
        if shape != expected {
            return Err(LeafError::Inference(format!(
                "入力テンソルの形状 {:?} がモデルの入力 {:?} と一致しません",
                shape, expected
            )));
        }
        let data = TensorData::new(tensor.as_slice().to_vec(), shape);

        // NHWC -> NCHW
        let input = Tensor::<B, 4>::from_data(data, &self.device).permute([0, 3, 1, 2]);

        let logits = self.model.forward(input);
        let probabilities = softmax(logits, 1);

        probabilities
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| LeafError::Inference(format!("推論結果の取得エラー: {:?}", e)))
    }

    /// 前処理済みテンソルを分類
    pub fn classify(&self, tensor: &PreprocessedTensor, labels: &ClassLabelSet) -> LeafResult<Prediction> {
        let probabilities = self.probabilities(tensor)?;
        select_label(&probabilities, labels)
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }
}

/// モデルの重みをバイナリにシリアライズ
pub fn model_to_bytes<B: Backend>(model: LeafClassifier<B>) -> LeafResult<Vec<u8>> {
    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    recorder
        .record(model.into_record(), ())
        .map_err(|e| LeafError::Inference(format!("モデル重みの書き出しエラー: {:?}", e)))
}
