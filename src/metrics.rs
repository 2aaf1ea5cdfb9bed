//! 学習結果のサマリと損失履歴。

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// 1つの学習レジームのエポックごとの損失。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LossHistory {
    pub train: Vec<f32>,
    pub test: Vec<f32>,
    /// 物理正則化項。データのみのレジームでは空です。
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub jac: Vec<f32>,
}

impl LossHistory {
    pub fn epochs(&self) -> usize {
        self.train.len()
    }

    pub fn final_train(&self) -> Option<f32> {
        self.train.last().copied()
    }

    pub fn final_test(&self) -> Option<f32> {
        self.test.last().copied()
    }

    pub fn final_jac(&self) -> Option<f32> {
        self.jac.last().copied()
    }

    /// 記録されたすべての損失が有限か。
    pub fn is_finite(&self) -> bool {
        self.train
            .iter()
            .chain(self.test.iter())
            .chain(self.jac.iter())
            .all(|v| v.is_finite())
    }
}

/// 両レジームの損失履歴 (`loss_history.json`)。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub nn: LossHistory,
    pub pcinn: LossHistory,
}

/// 学習ジョブ1回ぶんの結果 (`metrics.json`)。学習の最後に一度だけ書き出します。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub dataset_path: PathBuf,
    pub assets_dir: PathBuf,
    pub out_dir: PathBuf,
    pub test_reaction: i64,
    pub epochs: usize,
    pub lr: f64,
    pub jac_samples: usize,
    pub data_weight: f32,
    pub jac_weight: f32,
    pub seed: u64,
    pub num_train_rows: usize,
    pub num_test_rows: usize,
    pub final_nn_train_loss: Option<f32>,
    pub final_nn_test_loss: Option<f32>,
    pub final_pcinn_train_loss: Option<f32>,
    pub final_pcinn_test_loss: Option<f32>,
    pub final_pcinn_jac_loss: Option<f32>,
    pub outputs: Vec<String>,
}

/// 値を整形済みJSONとしてファイルに書き出します。
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}
