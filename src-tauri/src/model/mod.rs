pub mod model_metadata;
pub mod model_storage;
pub mod artifact;
pub mod handle;
pub mod config;

pub use model_metadata::ModelMetadata;
pub use model_storage::{save_model_with_metadata, verify_bundle, load_model_with_metadata, print_metadata_info};
pub use artifact::{ArtifactFetcher, ArtifactSource, HttpArtifactSource, LocalModelArtifact, RemoteModelReference};
pub use handle::{LoadedModel, ModelHandle, SharedModel};
pub use config::{AppConfig, DeviceType, ModelSettings, PerformanceSettings, resolve_project_path};
