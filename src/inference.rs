use std::path::Path;

use burn::backend::NdArray;
use burn::module::Module;
use burn::prelude::Backend;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::Tensor;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;

use crate::error::{PcinnError, Result};
use crate::model::{InputJacobian, ModelKind, SurrogateModel, SurrogateModelConfig};
use crate::scaler::FeatureScaler;
use crate::{INPUT_DIM, OUTPUT_DIM};

type MyBackend = NdArray<f32>;

/// 学習済みの代理モデル。どちらのレジームで学習したかを保持します。
#[derive(Debug, Clone)]
pub enum TrainedModel<B: Backend> {
    Plain(SurrogateModel<B>),
    PhysicsInformed(SurrogateModel<B>),
}

impl<B: Backend> TrainedModel<B> {
    pub fn kind(&self) -> ModelKind {
        match self {
            TrainedModel::Plain(_) => ModelKind::Plain,
            TrainedModel::PhysicsInformed(_) => ModelKind::PhysicsInformed,
        }
    }

    /// スケーリング済み入力1点に対する6チャネルの生出力。
    pub fn predict(&self, scaled: [f32; INPUT_DIM]) -> Result<[f32; OUTPUT_DIM]> {
        let model = match self {
            TrainedModel::Plain(model) | TrainedModel::PhysicsInformed(model) => model,
        };
        let device = model.devices().into_iter().next().unwrap_or_default();
        let input = Tensor::<B, 1>::from_floats(scaled, &device).reshape([1, INPUT_DIM]);
        let output = model
            .forward(input)
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| PcinnError::Shape(format!("{e:?}")))?;
        output.try_into().map_err(|v: Vec<f32>| {
            PcinnError::Shape(format!("出力の要素数が {} ではなく {} です", OUTPUT_DIM, v.len()))
        })
    }
}

/// 予測結果。分子量チャネルは log10 値と `10^value` の両方を返します。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub x_output: f32,
    pub m_output: [f32; OUTPUT_DIM - 1],
    pub m_output_log10: [f32; OUTPUT_DIM - 1],
    pub model_type: ModelKind,
    /// 生の入力 `[M, S, I, temp, time]`
    pub input: [f32; INPUT_DIM],
}

impl Prediction {
    /// モデル出力 `[X, log10(Mn), ..., log10(Mv)]` を復号します。
    pub fn from_output(
        output: [f32; OUTPUT_DIM],
        model_type: ModelKind,
        input: [f32; INPUT_DIM],
    ) -> Self {
        let m_output_log10: [f32; OUTPUT_DIM - 1] = std::array::from_fn(|i| output[i + 1]);
        Self {
            x_output: output[0],
            m_output: m_output_log10.map(|v| 10f32.powf(v)),
            m_output_log10,
            model_type,
            input,
        }
    }
}

/// 推論に必要な状態（スケーラとロード済みモデル）をまとめたコンテキスト。
///
/// 重みファイルが無いモデルはロードされず、予測時に `ModelNotLoaded` になります。
#[derive(Debug)]
pub struct Predictor<B: Backend> {
    scaler: FeatureScaler,
    models: Vec<TrainedModel<B>>,
}

impl<B: Backend> Predictor<B> {
    pub fn new(scaler: FeatureScaler, models: Vec<TrainedModel<B>>) -> Self {
        Self { scaler, models }
    }

    /// `assets_dir` のスケーラ境界と `model_dir` の重みファイルから構築します。
    pub fn load(model_dir: &Path, assets_dir: &Path, device: &B::Device) -> Result<Self> {
        let scaler = FeatureScaler::load(assets_dir)?;
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        let mut models = Vec::new();
        for kind in ModelKind::ALL {
            let path = model_dir.join(format!("{}.mpk", kind.weights_stem()));
            if !path.exists() {
                tracing::warn!(model = %kind, path = %path.display(), "重みファイルが見つかりません");
                continue;
            }
            let model = SurrogateModelConfig::new()
                .init::<B, _>(&mut StdRng::seed_from_u64(0), device)
                .load_file(path.clone(), &recorder, device)?;
            tracing::info!(model = %kind, path = %path.display(), "モデルをロードしました");
            models.push(match kind {
                ModelKind::Plain => TrainedModel::Plain(model),
                ModelKind::PhysicsInformed => TrainedModel::PhysicsInformed(model),
            });
        }
        Ok(Self::new(scaler, models))
    }

    pub fn is_loaded(&self, kind: ModelKind) -> bool {
        self.model(kind).is_some()
    }

    pub fn model(&self, kind: ModelKind) -> Option<&TrainedModel<B>> {
        self.models.iter().find(|m| m.kind() == kind)
    }

    /// 生の入力 `[M, S, I, temp, time]` から予測します。
    pub fn predict(&self, kind: ModelKind, raw: [f32; INPUT_DIM]) -> Result<Prediction> {
        let model = self.model(kind).ok_or(PcinnError::ModelNotLoaded(kind))?;
        let output = model.predict(self.scaler.scale(&raw))?;
        Ok(Prediction::from_output(output, kind, raw))
    }
}

/// `infer`サブコマンドを実行します。
pub fn run(
    model_dir: &Path,
    assets_dir: &Path,
    kind: ModelKind,
    raw: [f32; INPUT_DIM],
) -> Result<Prediction> {
    let device = Default::default();
    let predictor = Predictor::<MyBackend>::load(model_dir, assets_dir, &device)?;
    predictor.predict(kind, raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scaler() -> FeatureScaler {
        FeatureScaler::new([0.5, 5.0, 0.005, 323.0, 300.0], [5.0, 9.5, 0.1, 363.0, 36000.0])
            .unwrap()
    }

    fn surrogate(seed: u64) -> SurrogateModel<MyBackend> {
        SurrogateModelConfig::new().init(&mut StdRng::seed_from_u64(seed), &Default::default())
    }

    #[test]
    fn weight_channels_are_exponentiated() {
        let p = Prediction::from_output(
            [0.7, 4.0, 4.5, 5.0, 5.2, 4.4],
            ModelKind::PhysicsInformed,
            [2.0, 8.0, 0.01, 343.0, 3600.0],
        );
        assert_eq!(p.x_output, 0.7);
        for (m, log) in p.m_output.iter().zip(p.m_output_log10.iter()) {
            assert!((m - 10f32.powf(*log)).abs() <= 1e-6 * m);
        }
        assert!((p.m_output[0] - 1.0e4).abs() < 1e-1);
    }

    #[test]
    fn missing_model_is_reported() {
        let predictor = Predictor::new(scaler(), vec![TrainedModel::Plain(surrogate(0))]);
        assert!(predictor.is_loaded(ModelKind::Plain));
        assert!(!predictor.is_loaded(ModelKind::PhysicsInformed));
        let err = predictor
            .predict(ModelKind::PhysicsInformed, [2.0, 8.0, 0.01, 343.0, 3600.0])
            .unwrap_err();
        assert!(matches!(err, PcinnError::ModelNotLoaded(ModelKind::PhysicsInformed)));
    }

    #[test]
    fn prediction_uses_scaled_input() {
        let model = surrogate(1);
        let raw = [2.0, 8.0, 0.01, 343.0, 3600.0];
        let s = scaler();
        let x = Tensor::<MyBackend, 1>::from_floats(s.scale(&raw), &Default::default())
            .reshape([1, INPUT_DIM]);
        let expected = model.forward(x).into_data().to_vec::<f32>().unwrap();
        let predictor = Predictor::new(s, vec![TrainedModel::PhysicsInformed(model)]);
        let p = predictor.predict(ModelKind::PhysicsInformed, raw).unwrap();
        assert_eq!(p.x_output, expected[0]);
        assert_eq!(p.m_output_log10.to_vec(), expected[1..].to_vec());
    }

    #[test]
    fn loads_only_existing_weight_files() {
        let dir = tempfile::tempdir().unwrap();
        scaler().save(dir.path()).unwrap();
        surrogate(2)
            .save_file(
                dir.path().join(ModelKind::Plain.weights_stem()),
                &NamedMpkFileRecorder::<FullPrecisionSettings>::new(),
            )
            .unwrap();
        let predictor =
            Predictor::<MyBackend>::load(dir.path(), dir.path(), &Default::default()).unwrap();
        assert!(predictor.is_loaded(ModelKind::Plain));
        assert!(!predictor.is_loaded(ModelKind::PhysicsInformed));
    }
}
