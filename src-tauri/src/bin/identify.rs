//! コマンドラインから葉画像を識別する簡易バイナリ
//!
//! 使い方:
//!   identify <image>... [--backend cpu|wgpu] [--config path]
//!   identify --performance [--config path]

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tracing::{error, info, warn};

use leaf_identifier_lib::ml::{ClassLabelSet, ImagePreprocessor};
use leaf_identifier_lib::model::{AppConfig, DeviceType, ModelHandle};
use leaf_identifier_lib::router::ViewRouter;

#[derive(Debug, Default)]
struct Args {
    images: Vec<PathBuf>,
    backend: Option<DeviceType>,
    config: Option<PathBuf>,
    performance: bool,
}

fn parse_args(raw: impl IntoIterator<Item = String>) -> Result<Args> {
    let mut args = Args::default();
    let mut iter = raw.into_iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--backend" => {
                let value = iter.next().context("--backend には cpu か wgpu を指定してください")?;
                args.backend = Some(value.parse().map_err(anyhow::Error::msg)?);
            }
            "--config" => {
                let value = iter.next().context("--config には設定ファイルのパスを指定してください")?;
                args.config = Some(PathBuf::from(value));
            }
            "--performance" => args.performance = true,
            flag if flag.starts_with("--") => bail!("不明なオプションです: {}", flag),
            path => args.images.push(PathBuf::from(path)),
        }
    }

    if !args.performance && args.images.is_empty() {
        bail!("Usage: identify <image>... [--backend cpu|wgpu] [--config path]\n       identify --performance [--config path]");
    }
    Ok(args)
}

fn show_performance(config: &AppConfig) {
    let router = ViewRouter::from_config(config);
    info!("評価画像ディレクトリ: {}", router.artifact_dir().display());

    for artifact in router.performance_view().artifacts {
        match &artifact.warning {
            None => println!("{}: {} (OK)", artifact.title, artifact.file_name),
            Some(warning) => println!("{}: {}", artifact.title, warning),
        }
    }
}

fn identify_all(config: &AppConfig, images: &[PathBuf]) -> Result<usize> {
    let handle = ModelHandle::from_config(config)?;
    let model = handle.get_model()?;
    let preprocessor = ImagePreprocessor::default();
    let labels = ClassLabelSet::leaf_species();

    let mut failures = 0;
    for path in images {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) => {
                error!("{} を読み込めません: {}", path.display(), e);
                failures += 1;
                continue;
            }
        };

        let result = preprocessor
            .preprocess(&bytes)
            .and_then(|tensor| model.classify(&tensor, &labels));

        match result {
            Ok(prediction) => println!(
                "{}\t{}\t{:.1}%",
                path.display(),
                prediction.label,
                prediction.confidence * 100.0
            ),
            Err(e) if !e.is_fatal() => {
                warn!("{}: {}", path.display(), e);
                failures += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(failures)
}

fn main() -> Result<()> {
    leaf_identifier_lib::init_logging();

    let args = parse_args(std::env::args().skip(1))?;

    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("設定ファイルの読み込みエラー: {}", path.display()))?,
        None => AppConfig::load_or_default(),
    };
    if let Some(backend) = args.backend {
        config.device_type = backend;
    }
    config.display();

    if args.performance {
        show_performance(&config);
    }

    if !args.images.is_empty() {
        let failures = identify_all(&config, &args.images)?;
        if failures > 0 {
            bail!("{} 件の画像を識別できませんでした", failures);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<Args> {
        parse_args(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_parse_images_and_backend() {
        let parsed = args(&["a.jpg", "--backend", "wgpu", "b.png"]).unwrap();
        assert_eq!(parsed.images, vec![PathBuf::from("a.jpg"), PathBuf::from("b.png")]);
        assert_eq!(parsed.backend, Some(DeviceType::Wgpu));
        assert!(!parsed.performance);
    }

    #[test]
    fn test_parse_performance_only() {
        let parsed = args(&["--performance", "--config", "x.json"]).unwrap();
        assert!(parsed.performance);
        assert_eq!(parsed.config, Some(PathBuf::from("x.json")));
    }

    #[test]
    fn test_parse_errors() {
        assert!(args(&[]).is_err());
        assert!(args(&["a.jpg", "--backend"]).is_err());
        assert!(args(&["a.jpg", "--backend", "tpu"]).is_err());
        assert!(args(&["--verbose"]).is_err());
    }
}
