fn main() {
    // デスクトップシェルを含めてビルドする場合のみTauriの設定を処理する
    #[cfg(feature = "desktop")]
    tauri_build::build();
}
