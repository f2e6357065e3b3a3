//! 学習済みモデルファイルの取得
//!
//! ローカルにモデルファイルがあればそのまま使い、無ければリモートストアから
//! 一度だけダウンロードします。ダウンロードは `.part` ファイルに書き込み、
//! 検証が済んでから本来のパスへリネームします。

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use crate::error::{LeafError, LeafResult};
use crate::model::model_storage::verify_bundle;

/// リモートに置かれたモデルの参照（起動時に固定）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteModelReference {
    /// リモートストア上のID
    pub id: String,
    /// 実際に取得するURL
    pub url: String,
}

impl RemoteModelReference {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
        }
    }

    /// Google DriveのファイルIDから直接ダウンロード用の参照を作る
    pub fn google_drive(id: &str) -> LeafResult<Self> {
        let url = url::Url::parse_with_params(
            "https://drive.google.com/uc",
            &[("export", "download"), ("id", id), ("confirm", "t")],
        )
        .map_err(|e| LeafError::download(id, e))?;
        Ok(Self::new(id, url.to_string()))
    }
}

/// ローカルに存在するモデルファイル
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalModelArtifact {
    pub path: PathBuf,
    /// 今回の呼び出しでダウンロードしたかどうか
    pub downloaded: bool,
}

/// モデルファイルの取得元
///
/// `dest` に内容を書き込み、書き込んだバイト数を返します。
pub trait ArtifactSource: Send + Sync {
    fn fetch(&self, reference: &RemoteModelReference, dest: &mut dyn Write) -> LeafResult<u64>;
}

/// HTTP(S)でモデルを取得する
pub struct HttpArtifactSource {
    client: reqwest::blocking::Client,
}

impl HttpArtifactSource {
    pub fn new(timeout: Duration) -> LeafResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(timeout)
            .build()
            .map_err(|e| LeafError::download("", format!("HTTPクライアントの初期化に失敗: {}", e)))?;
        Ok(Self { client })
    }
}

impl ArtifactSource for HttpArtifactSource {
    fn fetch(&self, reference: &RemoteModelReference, dest: &mut dyn Write) -> LeafResult<u64> {
        let mut resp = self
            .client
            .get(&reference.url)
            .send()
            .map_err(|e| LeafError::download(&reference.url, e))?;

        if !resp.status().is_success() {
            return Err(LeafError::download(&reference.url, format!("HTTP {}", resp.status())));
        }

        // 大きなファイルの確認ページなど、モデルではなくHTMLが返ってきた場合
        let is_html = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("text/html"))
            .unwrap_or(false);
        if is_html {
            return Err(LeafError::download(
                &reference.url,
                "モデルファイルではなくHTMLページが返されました",
            ));
        }

        let mut buf = [0u8; 65536];
        let mut total = 0u64;
        loop {
            match resp.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    dest.write_all(&buf[..n])
                        .map_err(|e| LeafError::download(&reference.url, e))?;
                    total += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(LeafError::download(&reference.url, e)),
            }
        }
        Ok(total)
    }
}

/// モデルファイルがローカルにあることを保証する
pub struct ArtifactFetcher {
    source: Box<dyn ArtifactSource>,
}

impl ArtifactFetcher {
    pub fn new(source: Box<dyn ArtifactSource>) -> Self {
        Self { source }
    }

    /// HTTP取得元を使うフェッチャー
    pub fn http(timeout: Duration) -> LeafResult<Self> {
        Ok(Self::new(Box::new(HttpArtifactSource::new(timeout)?)))
    }

    /// ファイルが既にあればネットワークに触れずに返し、無ければダウンロードする
    ///
    /// 既存ファイルがバンドルとして読めない場合は削除して取り直します。
    /// ダウンロード結果も `.part` のまま検証し、読めなければ本来のパスには置きません。
    pub fn ensure_local_model(
        &self,
        reference: &RemoteModelReference,
        dest_path: &Path,
    ) -> LeafResult<LocalModelArtifact> {
        if dest_path.exists() {
            match verify_bundle(dest_path) {
                Ok(_) => {
                    info!("[ArtifactFetcher] ローカルのモデルを使用します: {}", dest_path.display());
                    return Ok(LocalModelArtifact {
                        path: dest_path.to_path_buf(),
                        downloaded: false,
                    });
                }
                Err(e) => {
                    warn!(
                        "[ArtifactFetcher] ローカルのモデルが壊れているため取り直します ({}): {:#}",
                        dest_path.display(),
                        e
                    );
                    fs::remove_file(dest_path).map_err(|e| LeafError::download(&reference.url, e))?;
                }
            }
        }

        info!(
            "[ArtifactFetcher] モデルをダウンロードしています: id={} -> {}",
            reference.id,
            dest_path.display()
        );

        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent).map_err(|e| LeafError::download(&reference.url, e))?;
        }

        let part_path = part_path_for(dest_path);
        let result = self.download_to(reference, &part_path);
        if let Err(e) = result {
            // 中途半端なファイルを残さない
            if part_path.exists() {
                if let Err(remove_err) = fs::remove_file(&part_path) {
                    warn!("[ArtifactFetcher] 一時ファイルの削除に失敗: {}", remove_err);
                }
            }
            return Err(e);
        }

        fs::rename(&part_path, dest_path).map_err(|e| LeafError::download(&reference.url, e))?;

        let size = fs::metadata(dest_path).map(|m| m.len()).unwrap_or(0);
        info!("[ArtifactFetcher] ダウンロード完了: {} bytes", size);

        Ok(LocalModelArtifact {
            path: dest_path.to_path_buf(),
            downloaded: true,
        })
    }

    fn download_to(&self, reference: &RemoteModelReference, part_path: &Path) -> LeafResult<()> {
        let mut file = File::create(part_path).map_err(|e| LeafError::download(&reference.url, e))?;
        let written = self.source.fetch(reference, &mut file)?;
        file.flush().map_err(|e| LeafError::download(&reference.url, e))?;
        drop(file);

        if written == 0 {
            return Err(LeafError::download(&reference.url, "ダウンロードしたファイルが空です"));
        }

        let metadata = verify_bundle(part_path).map_err(|e| {
            LeafError::download(
                &reference.url,
                format!("ダウンロードしたファイルはモデルバンドルではありません: {:#}", e),
            )
        })?;
        info!(
            "[ArtifactFetcher] バンドルを確認しました: {} ({}クラス)",
            metadata.model_name, metadata.num_classes
        );
        Ok(())
    }
}

fn part_path_for(dest_path: &Path) -> PathBuf {
    let mut name = dest_path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    dest_path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::model_metadata::ModelMetadata;
    use crate::model::model_storage::save_model_with_metadata;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FakeSource {
        body: Vec<u8>,
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl ArtifactSource for FakeSource {
        fn fetch(&self, reference: &RemoteModelReference, dest: &mut dyn Write) -> LeafResult<u64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(LeafError::download(&reference.url, "connection refused"));
            }
            dest.write_all(&self.body).unwrap();
            Ok(self.body.len() as u64)
        }
    }

    fn fetcher(body: &[u8], fail: bool) -> (ArtifactFetcher, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = FakeSource {
            body: body.to_vec(),
            calls: calls.clone(),
            fail,
        };
        (ArtifactFetcher::new(Box::new(source)), calls)
    }

    fn reference() -> RemoteModelReference {
        RemoteModelReference::new("abc", "https://example.invalid/abc")
    }

    /// 読み込み可能な最小のバンドル
    fn bundle(dir: &Path, name: &str) -> Vec<u8> {
        let path = dir.join(format!("{}.src.tar.gz", name));
        let metadata = ModelMetadata::new(name, vec!["a".into(), "b".into()], 299, 2, 2);
        save_model_with_metadata(&path, &metadata, b"weights").unwrap();
        fs::read(path).unwrap()
    }

    #[test]
    fn test_existing_file_skips_network() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("model.tar.gz");
        let cached = bundle(dir.path(), "cached");
        fs::write(&dest, &cached).unwrap();

        let (fetcher, calls) = fetcher(&bundle(dir.path(), "remote"), false);
        let artifact = fetcher.ensure_local_model(&reference(), &dest).unwrap();

        assert!(!artifact.downloaded);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(fs::read(&dest).unwrap(), cached);
    }

    #[test]
    fn test_missing_file_is_downloaded_once() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("models/model.tar.gz");
        let remote = bundle(dir.path(), "remote");

        let (fetcher, calls) = fetcher(&remote, false);
        let first = fetcher.ensure_local_model(&reference(), &dest).unwrap();
        let second = fetcher.ensure_local_model(&reference(), &dest).unwrap();

        assert!(first.downloaded);
        assert!(!second.downloaded);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(fs::read(&dest).unwrap(), remote);
        assert!(!part_path_for(&dest).exists());
    }

    #[test]
    fn test_network_failure_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("model.tar.gz");

        let (fetcher, _) = fetcher(b"", true);
        let err = fetcher.ensure_local_model(&reference(), &dest).unwrap_err();

        assert!(matches!(err, LeafError::Download { .. }));
        assert!(!dest.exists());
        assert!(!part_path_for(&dest).exists());
    }

    #[test]
    fn test_empty_download_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("model.tar.gz");

        let (fetcher, _) = fetcher(b"", false);
        let err = fetcher.ensure_local_model(&reference(), &dest).unwrap_err();

        assert!(matches!(err, LeafError::Download { .. }));
        assert!(!dest.exists());
    }

    #[test]
    fn test_corrupt_download_is_not_kept() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("model.tar.gz");

        let (fetcher, calls) = fetcher(b"truncated-garbage", false);
        let first = fetcher.ensure_local_model(&reference(), &dest).unwrap_err();
        let second = fetcher.ensure_local_model(&reference(), &dest).unwrap_err();

        assert!(matches!(first, LeafError::Download { .. }));
        assert!(matches!(second, LeafError::Download { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!dest.exists());
        assert!(!part_path_for(&dest).exists());
    }

    #[test]
    fn test_keras_download_reports_format() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("model.tar.gz");

        let (fetcher, _) = fetcher(b"PK\x03\x04model.keras", false);
        let err = fetcher.ensure_local_model(&reference(), &dest).unwrap_err();

        assert!(matches!(err, LeafError::Download { .. }));
        assert!(err.to_string().contains("Keras"));
        assert!(!dest.exists());
    }

    #[test]
    fn test_corrupt_local_file_is_refetched() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("model.tar.gz");
        fs::write(&dest, b"<html>quota exceeded</html>").unwrap();
        let remote = bundle(dir.path(), "remote");

        let (fetcher, calls) = fetcher(&remote, false);
        let artifact = fetcher.ensure_local_model(&reference(), &dest).unwrap();

        assert!(artifact.downloaded);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(fs::read(&dest).unwrap(), remote);
    }

    #[test]
    fn test_google_drive_reference() {
        let reference = RemoteModelReference::google_drive("1XIdB6g1").unwrap();
        assert_eq!(reference.id, "1XIdB6g1");
        assert!(reference.url.starts_with("https://drive.google.com/uc?"));
        assert!(reference.url.contains("id=1XIdB6g1"));
        assert!(reference.url.contains("export=download"));
    }

    #[test]
    fn test_part_path() {
        assert_eq!(
            part_path_for(Path::new("/tmp/model.tar.gz")),
            PathBuf::from("/tmp/model.tar.gz.part")
        );
    }
}
