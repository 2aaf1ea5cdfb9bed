use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::TrainConfig;
use crate::model::ModelKind;

/// clapでコマンドラインの構造を定義します。
#[derive(Parser, Debug)]
#[command(author, version, about = "A physics-constrained surrogate model (PCINN) trainer with Burn", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// 実行するサブコマンドを定義します（train または infer）。
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// NNとPCINNを学習し、重みとメトリクスをファイルに保存します
    Train(TrainArgs),
    /// 保存されたモデルを使い、1点の推論を実行します
    Infer(InferArgs),
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// 実験データのCSV
    #[arg(long)]
    pub dataset: PathBuf,
    /// スケーラ境界とドメインモデル重みのディレクトリ
    #[arg(long, default_value = ".")]
    pub assets_dir: PathBuf,
    /// 出力ディレクトリ
    #[arg(long, default_value = "models")]
    pub out_dir: PathBuf,
    #[arg(long, default_value_t = 8)]
    pub test_reaction: i64,
    #[arg(long, default_value_t = 10_000)]
    pub epochs: usize,
    #[arg(long, default_value_t = 3e-4)]
    pub lr: f64,
    #[arg(long, default_value_t = 32)]
    pub jac_samples: usize,
    /// データ損失の重み
    #[arg(long, default_value_t = 1.0)]
    pub data_weight: f32,
    /// ヤコビアン損失の重み
    #[arg(long, default_value_t = 1.0)]
    pub jac_weight: f32,
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
    #[arg(long, default_value_t = 500)]
    pub log_interval: usize,
    /// 損失グラフを出力する
    #[arg(long)]
    pub plot: bool,
}

impl From<TrainArgs> for TrainConfig {
    fn from(args: TrainArgs) -> Self {
        Self {
            dataset_path: args.dataset,
            assets_dir: args.assets_dir,
            out_dir: args.out_dir,
            test_reaction: args.test_reaction,
            epochs: args.epochs,
            lr: args.lr,
            jac_samples: args.jac_samples,
            data_weight: args.data_weight,
            jac_weight: args.jac_weight,
            seed: args.seed,
            log_interval: args.log_interval,
            plot: args.plot,
        }
    }
}

#[derive(Args, Debug)]
pub struct InferArgs {
    /// 学習済み重みのディレクトリ
    #[arg(long, default_value = "models")]
    pub model_dir: PathBuf,
    /// スケーラ境界のディレクトリ
    #[arg(long, default_value = ".")]
    pub assets_dir: PathBuf,
    #[arg(long, value_enum, default_value_t = ModelKind::PhysicsInformed)]
    pub model: ModelKind,
    /// モノマー濃度
    #[arg(long = "m")]
    pub monomer: f32,
    /// 溶媒濃度
    #[arg(long = "s")]
    pub solvent: f32,
    /// 開始剤濃度
    #[arg(long = "i")]
    pub initiator: f32,
    /// 温度 [K]
    #[arg(long)]
    pub temp: f32,
    /// 反応時間 [s]
    #[arg(long)]
    pub time: f32,
}

impl InferArgs {
    pub fn raw_input(&self) -> [f32; crate::INPUT_DIM] {
        [self.monomer, self.solvent, self.initiator, self.temp, self.time]
    }
}
