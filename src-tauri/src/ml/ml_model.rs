//! 機械学習モデルの共通定義
//!
//! 葉画像分類用のCNNモデルと、クラスラベルなどの固定設定を提供します。

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        Linear, LinearConfig, Relu,
    },
    tensor::{backend::Backend, Tensor},
};
use tracing::debug;

/// クラス数
pub const NUM_CLASSES: usize = 10;

/// 画像サイズ（InceptionV3互換の入力解像度）
pub const IMAGE_SIZE: usize = 299;

/// クラス名の定義（出力層のインデックス順）
pub const CLASS_NAMES: [&str; NUM_CLASSES] = [
    "Belimbing Wuluh",
    "Daun Jeruk",
    "Daun Kari",
    "Daun Katuk",
    "Daun Kelor",
    "Daun Kemangi",
    "Daun Kunyit",
    "Daun Sirih",
    "Daun Sirsak",
    "Jambu Biji",
];

/// モデル出力のインデックスと対応するクラスラベルの並び
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassLabelSet {
    labels: Vec<String>,
}

impl ClassLabelSet {
    pub fn new<S: Into<String>>(labels: impl IntoIterator<Item = S>) -> Self {
        Self {
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }

    /// 組み込みの10クラス
    pub fn leaf_species() -> Self {
        Self::new(CLASS_NAMES)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.labels
    }
}

impl Default for ClassLabelSet {
    fn default() -> Self {
        Self::leaf_species()
    }
}

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 分類クラス数
    pub num_classes: usize,
    /// 入力画像サイズ（正方形）
    #[config(default = 299)]
    pub image_size: usize,
    /// 最初の畳み込み層のチャネル数
    #[config(default = 32)]
    pub base_channels: usize,
    /// 全結合層の前の適応プーリング出力サイズ
    #[config(default = 4)]
    pub pooled_size: usize,
}

impl ModelConfig {
    /// モデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> LeafClassifier<B> {
        let c1 = self.base_channels;
        let c2 = c1 * 2;
        let c3 = c1 * 4;

        // 畳み込み後は適応プーリングで固定サイズにするため、特徴次元は入力サイズに依存しない
        let d = c3 * self.pooled_size * self.pooled_size;
        let d_half = (d / 2).max(self.num_classes);

        debug!("[Model] 入力サイズ: {}x{}", self.image_size, self.image_size);
        debug!("[Model] チャネル: 3 -> {} -> {} -> {}", c1, c2, c3);
        debug!("[Model] Flatten後の特徴次元 d: {}", d);
        debug!("[Model] FC1: {} -> {}", d, d_half);
        debug!("[Model] FC2: {} -> {}", d_half, self.num_classes);

        LeafClassifier {
            conv1: Conv2dConfig::new([3, c1], [3, 3]).with_stride([1, 1]).init(device),
            pool1: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),

            conv2: Conv2dConfig::new([c1, c2], [3, 3]).with_stride([1, 1]).init(device),
            pool2: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),

            conv3: Conv2dConfig::new([c2, c3], [3, 3]).with_stride([1, 1]).init(device),
            pool3: AdaptiveAvgPool2dConfig::new([self.pooled_size, self.pooled_size]).init(),

            fc1: LinearConfig::new(d, d_half).init(device),
            fc2: LinearConfig::new(d_half, self.num_classes).init(device),

            activation: Relu::new(),
        }
    }
}

/// 葉画像分類用CNNモデル
///
/// # アーキテクチャ
/// - {Conv 3x3 + ReLU + MaxPool 2x2} x 2層
/// - Conv 3x3 + ReLU + AdaptiveAvgPool
/// - Flatten
/// - FC: d -> d/2 + ReLU
/// - FC: d/2 -> num_classes
#[derive(Module, Debug)]
pub struct LeafClassifier<B: Backend> {
    conv1: Conv2d<B>,
    pool1: MaxPool2d,
    conv2: Conv2d<B>,
    pool2: MaxPool2d,
    conv3: Conv2d<B>,
    pool3: AdaptiveAvgPool2d,

    fc1: Linear<B>,
    fc2: Linear<B>,

    activation: Relu,
}

impl<B: Backend> LeafClassifier<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 3, size, size]
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        let x = self.conv1.forward(images);
        let x = self.activation.forward(x);
        let x = self.pool1.forward(x);

        let x = self.conv2.forward(x);
        let x = self.activation.forward(x);
        let x = self.pool2.forward(x);

        let x = self.conv3.forward(x);
        let x = self.activation.forward(x);
        let x = self.pool3.forward(x);

        let [_, c, h, w] = x.dims();
        let x = x.reshape([batch_size, c * h * w]);

        let x = self.fc1.forward(x);
        let x = self.activation.forward(x);

        self.fc2.forward(x)
    }
}
