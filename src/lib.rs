//! # 物理制約付きニューラルネットワーク (PCINN) ライブラリ
//!
//! `burn` フレームワークを使用して、重合反応の転化率と分子量分布統計量を
//! 5つのプロセス入力から予測する代理モデルを学習します。
//!
//! 学習は2通りです。
//! - データのみで学習する通常のNN
//! - 事前学習済みのドメイン（理論）モデルと入力→出力ヤコビアンを一致させる
//!   正則化項を加えた PCINN

pub mod cli;
pub mod collocation;
pub mod config;
pub mod dataset;
pub mod error;
pub mod inference;
pub mod metrics;
pub mod model;
pub mod pinn;
pub mod scaler;
pub mod training;

pub use config::TrainConfig;
pub use error::{PcinnError, Result};

/// 入力次元 `[M, S, I, temp, time]`
pub const INPUT_DIM: usize = 5;
/// 出力次元 `[X, Mn, Mw, Mz, Mz+1, Mv]`
pub const OUTPUT_DIM: usize = 6;

/// 通常のNNの重みファイル名（拡張子 `.mpk` は保存時に付与されます）
pub const NN_MODEL_STEM: &str = "nn_model";
/// PCINNの重みファイル名
pub const PCINN_MODEL_STEM: &str = "pcinn_model";
/// ドメインモデルの重みファイル名
pub const DOMAIN_MODEL_STEM: &str = "mma_solution_net";
pub const SCALER_MIN_FILENAME: &str = "scalerx_min.json";
pub const SCALER_MAX_FILENAME: &str = "scalerx_max.json";
pub const METRICS_FILENAME: &str = "metrics.json";
pub const LOSS_HISTORY_FILENAME: &str = "loss_history.json";
pub const LOSS_GRAPH_FILENAME: &str = "loss_graph.png";
