//! 学習ジョブの設定。

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{PcinnError, Result};

/// 学習の実行設定。各フィールドは同名の処理ステップにのみ影響します。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    /// 実験データ（CSV）のパス
    pub dataset_path: PathBuf,
    /// スケーラ境界とドメインモデル重みを置いたディレクトリ
    pub assets_dir: PathBuf,
    /// 学習済み重みとメトリクスの出力先
    pub out_dir: PathBuf,
    /// テスト側に回す反応ID
    pub test_reaction: i64,
    pub epochs: usize,
    pub lr: f64,
    /// 1エポックあたりのコロケーション点数
    pub jac_samples: usize,
    pub data_weight: f32,
    pub jac_weight: f32,
    /// 重み初期化とコロケーションサンプリングの両方を固定するシード
    pub seed: u64,
    /// 進捗ログを出すエポック間隔
    #[serde(default = "default_log_interval")]
    pub log_interval: usize,
    /// 損失グラフ (`loss_graph.png`) を描画するか
    #[serde(default)]
    pub plot: bool,
}

fn default_log_interval() -> usize {
    500
}

impl TrainConfig {
    /// 既定値の設定を作成します。
    pub fn new(dataset_path: impl Into<PathBuf>) -> Self {
        Self {
            dataset_path: dataset_path.into(),
            assets_dir: PathBuf::from("."),
            out_dir: PathBuf::from("models"),
            test_reaction: 8,
            epochs: 10_000,
            lr: 3e-4,
            jac_samples: 32,
            data_weight: 1.0,
            jac_weight: 1.0,
            seed: 0,
            log_interval: default_log_interval(),
            plot: false,
        }
    }

    /// 学習を始める前に設定値を検証します。
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(PcinnError::Config("epochs は1以上である必要があります".into()));
        }
        if self.jac_samples == 0 {
            return Err(PcinnError::Config(
                "jac_samples は1以上である必要があります".into(),
            ));
        }
        if !self.lr.is_finite() || self.lr <= 0.0 {
            return Err(PcinnError::Config(format!(
                "lr は正の有限値である必要があります: {}",
                self.lr
            )));
        }
        for (name, weight) in [("data_weight", self.data_weight), ("jac_weight", self.jac_weight)] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(PcinnError::Config(format!(
                    "{} は0以上の有限値である必要があります: {}",
                    name, weight
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = TrainConfig::new("data.csv");
        assert_eq!(config.test_reaction, 8);
        assert_eq!(config.jac_samples, 32);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_epochs_is_rejected() {
        let config = TrainConfig {
            epochs: 0,
            ..TrainConfig::new("data.csv")
        };
        assert!(matches!(config.validate(), Err(PcinnError::Config(_))));
    }

    #[test]
    fn negative_jac_weight_is_rejected() {
        let config = TrainConfig {
            jac_weight: -1.0,
            ..TrainConfig::new("data.csv")
        };
        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("jac_weight"));
    }

    #[test]
    fn optional_fields_default_when_deserializing() {
        let json = r#"{
            "dataset_path": "d.csv", "assets_dir": ".", "out_dir": "out",
            "test_reaction": 3, "epochs": 10, "lr": 0.001, "jac_samples": 4,
            "data_weight": 1.0, "jac_weight": 0.5, "seed": 1
        }"#;
        let config: TrainConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.log_interval, 500);
        assert!(!config.plot);
    }
}
