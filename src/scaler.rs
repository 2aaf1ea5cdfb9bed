//! 入力5変数 `[M, S, I, temp, time]` の min-max スケーリング。
//!
//! 学習と推論で同じ境界を使う必要があります。境界が食い違っていても
//! 予測は黙って誤った値になるため、境界はアセットから一度だけ読み込みます。

use std::fs;
use std::path::Path;

use burn::prelude::Backend;
use burn::tensor::Tensor;

use crate::error::{PcinnError, Result};
use crate::{INPUT_DIM, SCALER_MAX_FILENAME, SCALER_MIN_FILENAME};

/// 特徴量ごとの最小値・最大値を保持する min-max スケーラ。
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureScaler {
    min: [f32; INPUT_DIM],
    max: [f32; INPUT_DIM],
}

impl FeatureScaler {
    /// 境界からスケーラを作成します。
    ///
    /// 非有限の境界や幅ゼロ（または負）の範囲はゼロ除算になるため拒否します。
    pub fn new(min: [f32; INPUT_DIM], max: [f32; INPUT_DIM]) -> Result<Self> {
        for (i, (lo, hi)) in min.iter().zip(max.iter()).enumerate() {
            if !lo.is_finite() || !hi.is_finite() {
                return Err(PcinnError::Degenerate(format!(
                    "スケーラ境界 {} が有限ではありません (min={}, max={})",
                    i, lo, hi
                )));
            }
            if hi <= lo {
                return Err(PcinnError::Degenerate(format!(
                    "スケーラ範囲 {} の幅がゼロ以下です (min={}, max={})",
                    i, lo, hi
                )));
            }
        }
        Ok(Self { min, max })
    }

    /// `assets_dir` から `scalerx_min.json` と `scalerx_max.json` を読み込みます。
    pub fn load(assets_dir: &Path) -> Result<Self> {
        let min = read_bounds(&assets_dir.join(SCALER_MIN_FILENAME))?;
        let max = read_bounds(&assets_dir.join(SCALER_MAX_FILENAME))?;
        let scaler = Self::new(min, max)?;
        tracing::info!(?scaler.min, ?scaler.max, "スケーラ境界をロードしました");
        Ok(scaler)
    }

    /// スケーラ境界を `assets_dir` に書き出します。
    pub fn save(&self, assets_dir: &Path) -> Result<()> {
        fs::create_dir_all(assets_dir)?;
        fs::write(
            assets_dir.join(SCALER_MIN_FILENAME),
            serde_json::to_string(&self.min)?,
        )?;
        fs::write(
            assets_dir.join(SCALER_MAX_FILENAME),
            serde_json::to_string(&self.max)?,
        )?;
        Ok(())
    }

    /// `(x - min) / (max - min)`。範囲外の値はクランプせず外挿します。
    pub fn scale(&self, x: &[f32; INPUT_DIM]) -> [f32; INPUT_DIM] {
        std::array::from_fn(|i| (x[i] - self.min[i]) / (self.max[i] - self.min[i]))
    }

    /// `scale` の逆変換。
    pub fn unscale(&self, x: &[f32; INPUT_DIM]) -> [f32; INPUT_DIM] {
        std::array::from_fn(|i| x[i] * (self.max[i] - self.min[i]) + self.min[i])
    }

    /// `[N, 5]` テンソルを行ごとにスケーリングします。
    pub fn scale_tensor<B: Backend>(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let device = x.device();
        let min = Tensor::<B, 1>::from_floats(self.min, &device).unsqueeze::<2>();
        let range: [f32; INPUT_DIM] = std::array::from_fn(|i| self.max[i] - self.min[i]);
        let range = Tensor::<B, 1>::from_floats(range, &device).unsqueeze::<2>();
        (x - min) / range
    }
}

fn read_bounds(path: &Path) -> Result<[f32; INPUT_DIM]> {
    let text = fs::read_to_string(path).map_err(|e| PcinnError::Asset {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let values: Vec<f32> = serde_json::from_str(&text).map_err(|e| PcinnError::Asset {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    values.try_into().map_err(|v: Vec<f32>| PcinnError::Asset {
        path: path.to_path_buf(),
        reason: format!("要素数が {} ではなく {} です", INPUT_DIM, v.len()),
    })
}
