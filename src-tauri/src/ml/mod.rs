pub mod ml_model;
pub mod preprocess;
pub mod inference;

pub use ml_model::{ClassLabelSet, LeafClassifier, ModelConfig, NUM_CLASSES, IMAGE_SIZE, CLASS_NAMES};
pub use preprocess::{decode_image, ImagePreprocessor, PreprocessedTensor};
pub use inference::{argmax, model_to_bytes, select_label, InferenceEngine, Prediction};
