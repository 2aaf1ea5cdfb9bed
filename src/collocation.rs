//! 物理正則化用のコロケーション点（ラベルなしの合成入力）のサンプリング。

use std::ops::Range;

use burn::prelude::Backend;
use burn::tensor::Tensor;
use rand::Rng;

use crate::INPUT_DIM;
use crate::scaler::FeatureScaler;

/// モノマー濃度と溶媒濃度の和。サンプル点では `S = TOTAL_CONCENTRATION - M` とします。
pub const TOTAL_CONCENTRATION: f32 = 10.0;

/// 各物理量のサンプリング範囲。
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingRanges {
    /// モノマー濃度 `[M]`
    pub monomer: Range<f32>,
    /// 開始剤濃度 `[I]`
    pub initiator: Range<f32>,
    /// 温度 [K]
    pub temperature: Range<f32>,
    /// 反応時間 [s]
    pub time: Range<f32>,
}

impl Default for SamplingRanges {
    fn default() -> Self {
        Self {
            monomer: 0.5..5.0,
            initiator: 0.005..0.1,
            temperature: (273.0 + 50.0)..(273.0 + 90.0),
            time: (5.0 * 60.0)..(10.0 * 60.0 * 60.0),
        }
    }
}

/// 学習データと同じスケーラでスケーリングしたコロケーション点を生成します。
#[derive(Debug, Clone)]
pub struct CollocationSampler {
    ranges: SamplingRanges,
    scaler: FeatureScaler,
}

impl CollocationSampler {
    pub fn new(ranges: SamplingRanges, scaler: FeatureScaler) -> Self {
        Self { ranges, scaler }
    }

    pub fn ranges(&self) -> &SamplingRanges {
        &self.ranges
    }

    /// スケーリング前の `[M, S, I, temp, time]` を `n` 点生成します。
    pub fn sample_raw<R: Rng>(&self, n: usize, rng: &mut R) -> Vec<[f32; INPUT_DIM]> {
        (0..n)
            .map(|_| {
                let monomer = rng.random_range(self.ranges.monomer.clone());
                let solvent = TOTAL_CONCENTRATION - monomer;
                let initiator = rng.random_range(self.ranges.initiator.clone());
                let temperature = rng.random_range(self.ranges.temperature.clone());
                let time = rng.random_range(self.ranges.time.clone());
                [monomer, solvent, initiator, temperature, time]
            })
            .collect()
    }

    /// スケーリング済みの `[n, 5]` テンソルを生成します。
    pub fn sample<B: Backend, R: Rng>(
        &self,
        n: usize,
        rng: &mut R,
        device: &B::Device,
    ) -> Tensor<B, 2> {
        let raw = self.sample_raw(n, rng).concat();
        let raw = Tensor::<B, 1>::from_floats(raw.as_slice(), device).reshape([n, INPUT_DIM]);
        self.scaler.scale_tensor(raw)
    }
}
