//! モデルとメタデータの永続化
//!
//! Tar.gz形式でモデルとメタデータを1ファイルに統合して保存・読み込みします。
//!
//! ファイル構成（tar.gz内部）:
//! - metadata.json   - メタデータ（クラスラベル、入力サイズ、ネットワーク幅）
//! - model.bin       - モデルの重み（バイナリ）

use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tar::{Archive, Builder};
use tracing::info;

use crate::model::model_metadata::ModelMetadata;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// メタデータと共にモデルをTar.gz形式で保存
///
/// 1つのtar.gzファイルに以下を含む：
/// - metadata.json : メタデータ
/// - model.bin : モデルの重み
pub fn save_model_with_metadata(
    output_path: &Path,
    metadata: &ModelMetadata,
    model_binary: &[u8],
) -> Result<()> {
    // 親ディレクトリが存在しない場合は作成
    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)
            .context(format!("Failed to create parent directory: {:?}", parent))?;
    }

    let tar_gz_file = File::create(output_path)
        .context(format!("Failed to create tar.gz file: {:?}", output_path))?;

    let encoder = GzEncoder::new(tar_gz_file, Compression::default());
    let mut tar_builder = Builder::new(encoder);

    let json_str = metadata.to_json_string()?;
    append_entry(&mut tar_builder, "metadata.json", json_str.as_bytes())
        .context("Failed to add metadata.json to tar")?;
    append_entry(&mut tar_builder, "model.bin", model_binary)
        .context("Failed to add model.bin to tar")?;

    // gzipストリームまで閉じる
    tar_builder
        .into_inner()
        .and_then(|encoder| encoder.finish())
        .context("Failed to finalize tar.gz archive")?;

    Ok(())
}

fn append_entry<W: std::io::Write>(builder: &mut Builder<W>, name: &str, data: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append(&header, data)?;
    Ok(())
}

/// バンドルとして読み込めるかを確認し、メタデータを返す
///
/// gzipでない場合（Kerasの.keras/.h5など）はその旨をエラーにします。
/// model.bin は存在とサイズのみ確認し、メモリには読み込みません。
pub fn verify_bundle(tar_gz_path: &Path) -> Result<ModelMetadata> {
    let mut magic = Vec::with_capacity(4);
    File::open(tar_gz_path)
        .context(format!("Failed to open tar.gz file: {:?}", tar_gz_path))?
        .take(4)
        .read_to_end(&mut magic)?;

    if magic.starts_with(b"PK\x03\x04") {
        bail!("ZIP形式（Kerasの.kerasなど）のファイルです。metadata.json と model.bin を含む tar.gz が必要です");
    }
    if magic.starts_with(b"\x89HDF") {
        bail!("HDF5形式（Kerasの.h5など）のファイルです。metadata.json と model.bin を含む tar.gz が必要です");
    }
    if !magic.starts_with(&GZIP_MAGIC) {
        bail!("gzip形式ではありません");
    }

    let decoder = GzDecoder::new(File::open(tar_gz_path)?);
    let mut archive = Archive::new(decoder);

    let mut metadata_opt: Option<ModelMetadata> = None;
    let mut has_weights = false;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.to_string_lossy().into_owned();

        match name.as_str() {
            "metadata.json" => {
                let mut json_str = String::new();
                entry.read_to_string(&mut json_str)?;
                metadata_opt = Some(ModelMetadata::from_json_string(&json_str)?);
            }
            "model.bin" => {
                has_weights = entry.header().size()? > 0;
            }
            _ => {}
        }
    }

    match (metadata_opt, has_weights) {
        (Some(metadata), true) => Ok(metadata),
        (None, _) => Err(anyhow::anyhow!("metadata.json not found in tar.gz archive")),
        (_, false) => Err(anyhow::anyhow!("model.bin not found in tar.gz archive")),
    }
}

/// メタデータとモデルバイナリを共に読み込む
pub fn load_model_with_metadata(tar_gz_path: &Path) -> Result<(ModelMetadata, Vec<u8>)> {
    let tar_gz_file = File::open(tar_gz_path)
        .context(format!("Failed to open tar.gz file: {:?}", tar_gz_path))?;

    let decoder = GzDecoder::new(tar_gz_file);
    let mut archive = Archive::new(decoder);

    let mut metadata_opt: Option<ModelMetadata> = None;
    let mut model_binary_opt: Option<Vec<u8>> = None;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?;

        match path.to_str() {
            Some("metadata.json") => {
                let mut json_str = String::new();
                entry.read_to_string(&mut json_str)?;
                metadata_opt = Some(ModelMetadata::from_json_string(&json_str)?);
            }
            Some("model.bin") => {
                let mut buffer = Vec::new();
                entry.read_to_end(&mut buffer)?;
                model_binary_opt = Some(buffer);
            }
            _ => {}
        }
    }

    match (metadata_opt, model_binary_opt) {
        (Some(metadata), Some(binary)) => Ok((metadata, binary)),
        (None, _) => Err(anyhow::anyhow!("metadata.json not found in tar.gz archive")),
        (_, None) => Err(anyhow::anyhow!("model.bin not found in tar.gz archive")),
    }
}

/// メタデータをログに出力
pub fn print_metadata_info(metadata: &ModelMetadata) {
    info!("=== モデルメタデータ ===");
    info!("モデル名: {}", metadata.model_name);
    info!("クラスラベル: {}", metadata.class_labels.join(", "));
    info!("モデル入力サイズ: {}x{}", metadata.image_size, metadata.image_size);
    info!("チャネル幅: {} / プーリング: {}", metadata.base_channels, metadata.pooled_size);
    info!("作成日時: {}", metadata.created_at);
}
