//! エラー型と `Result` エイリアス。

use std::path::PathBuf;

use thiserror::Error;

use crate::model::ModelKind;

/// このクレートの操作が返す `Result` 型。
pub type Result<T> = std::result::Result<T, PcinnError>;

/// 学習・推論の実行中に発生しうるエラー。
///
/// いずれも致命的で、学習の途中再開や部分的な成功はありません。
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PcinnError {
    /// データセットに必須カラムが存在しない。
    #[error("データセットに必須カラムがありません: {0}")]
    Schema(String),

    /// データセットの行が不正（数値として読めないなど）。
    #[error("データセットエラー: {0}")]
    Dataset(String),

    /// スケーラ境界やドメインモデルの重みファイルが読めない。
    #[error("アセット '{}' を読み込めません: {reason}", path.display())]
    Asset { path: PathBuf, reason: String },

    /// 非正の分子量統計量、幅ゼロのスケーラ範囲などの数値的な縮退。
    #[error("数値的に不正な値: {0}")]
    Degenerate(String),

    /// テンソル形状の不一致。
    #[error("形状の不一致: {0}")]
    Shape(String),

    /// 設定値が不正。
    #[error("設定エラー: {0}")]
    Config(String),

    /// 推論対象のモデルがロードされていない。
    #[error("モデル '{0}' の重みがロードされていません。先に 'train' を実行してください")]
    ModelNotLoaded(ModelKind),

    /// 損失グラフの描画に失敗した。
    #[error("グラフの描画に失敗しました: {0}")]
    Plot(String),

    #[error("IOエラー: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSVエラー: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSONエラー: {0}")]
    Json(#[from] serde_json::Error),

    #[error("モデルの保存・読み込みに失敗しました: {0}")]
    Record(#[from] burn::record::RecorderError),
}
