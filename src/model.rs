use std::fmt;

use burn::config::Config;
use burn::module::{Module, Param};
use burn::nn::Linear;
use burn::prelude::Backend;
use burn::tensor::activation::{relu, sigmoid, softplus};
use burn::tensor::{Tensor, TensorData};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{INPUT_DIM, OUTPUT_DIM};

/// 入力→出力のヤコビアンを評価できるネットワーク。
///
/// どちらのモデルもスケーリング済みの5次元入力を受け取り、
/// `[conversion, log10(Mn), log10(Mw), log10(Mz), log10(Mz+1), log10(Mv)]`
/// の6次元を出力します。
pub trait InputJacobian<B: Backend> {
    /// 順伝播。`[N, 5] -> [N, 6]`
    fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2>;

    /// サンプルごとのヤコビアン `[N, 6, 5]`。
    ///
    /// 5方向の接ベクトルを `[5N, width]` にまとめて各層を前進伝播させるため、
    /// バッチ方向のループはなく、サンプル同士が混ざることもありません。
    /// 結果はパラメータについて微分可能なテンソル式です。
    fn input_jacobian(&self, input: Tensor<B, 2>) -> Tensor<B, 3>;
}

/// 学習対象のモデルの種類。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
pub enum ModelKind {
    /// データのみで学習した通常のNN
    #[value(name = "nn")]
    #[serde(rename = "nn")]
    Plain,
    /// ヤコビアン正則化付きで学習した PCINN
    #[value(name = "pcinn")]
    #[serde(rename = "pcinn")]
    PhysicsInformed,
}

impl ModelKind {
    pub const ALL: [ModelKind; 2] = [ModelKind::Plain, ModelKind::PhysicsInformed];

    /// 重みファイルの拡張子なしファイル名。
    pub fn weights_stem(self) -> &'static str {
        match self {
            ModelKind::Plain => crate::NN_MODEL_STEM,
            ModelKind::PhysicsInformed => crate::PCINN_MODEL_STEM,
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::Plain => f.write_str("nn"),
            ModelKind::PhysicsInformed => f.write_str("pcinn"),
        }
    }
}

/// 代理モデルの構成。
#[derive(Config, Debug)]
pub struct SurrogateModelConfig {
    #[config(default = "[128, 64]")]
    pub hidden: [usize; 2],
}

/// ドメイン（理論）モデルの構成。
#[derive(Config, Debug)]
pub struct DomainModelConfig {
    #[config(default = "[128, 128, 64]")]
    pub hidden: [usize; 3],
}

/// 学習対象の代理モデル。tanh 隠れ層2層と線形出力層からなるMLPです。
///
/// 出力は活性化なしで、log10 スケールの学習ターゲットにそのまま合わせます。
#[derive(Module, Debug)]
pub struct SurrogateModel<B: Backend> {
    fc1: Linear<B>,
    fc2: Linear<B>,
    fc3: Linear<B>,
}

/// 事前学習済みの理論ネットワーク。ヤコビアンの教師としてのみ使い、学習はしません。
///
/// 転化率チャネルは sigmoid、分子量チャネルは softplus で有界化されています。
#[derive(Module, Debug)]
pub struct DomainModel<B: Backend> {
    fc1: Linear<B>,
    fc2: Linear<B>,
    fc3: Linear<B>,
    x_out: Linear<B>,
    m_out: Linear<B>,
}

impl SurrogateModelConfig {
    /// `rng` から決定的に重みを初期化します。
    pub fn init<B: Backend, R: Rng>(&self, rng: &mut R, device: &B::Device) -> SurrogateModel<B> {
        let [h1, h2] = self.hidden;
        SurrogateModel {
            fc1: seeded_linear(INPUT_DIM, h1, rng, device),
            fc2: seeded_linear(h1, h2, rng, device),
            fc3: seeded_linear(h2, OUTPUT_DIM, rng, device),
        }
    }
}

impl DomainModelConfig {
    pub fn init<B: Backend, R: Rng>(&self, rng: &mut R, device: &B::Device) -> DomainModel<B> {
        let [h1, h2, h3] = self.hidden;
        DomainModel {
            fc1: seeded_linear(INPUT_DIM, h1, rng, device),
            fc2: seeded_linear(h1, h2, rng, device),
            fc3: seeded_linear(h2, h3, rng, device),
            x_out: seeded_linear(h3, 1, rng, device),
            m_out: seeded_linear(h3, OUTPUT_DIM - 1, rng, device),
        }
    }
}

/// `U(-1/sqrt(fan_in), 1/sqrt(fan_in))` で初期化した全結合層。
///
/// バックエンドのグローバル乱数を使わないので、同じシードなら常に同じ重みになります。
fn seeded_linear<B: Backend, R: Rng>(
    d_input: usize,
    d_output: usize,
    rng: &mut R,
    device: &B::Device,
) -> Linear<B> {
    let bound = 1.0 / (d_input as f32).sqrt();
    let weight = (0..d_input * d_output)
        .map(|_| rng.random_range(-bound..bound))
        .collect::<Vec<f32>>();
    let bias = (0..d_output)
        .map(|_| rng.random_range(-bound..bound))
        .collect::<Vec<f32>>();
    Linear {
        weight: Param::from_tensor(Tensor::from_data(
            TensorData::new(weight, [d_input, d_output]),
            device,
        )),
        bias: Some(Param::from_tensor(Tensor::from_data(
            TensorData::new(bias, [d_output]),
            device,
        ))),
    }
}

impl<B: Backend> InputJacobian<B> for SurrogateModel<B> {
    fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.fc1.forward(input).tanh();
        let x = self.fc2.forward(x).tanh();
        self.fc3.forward(x)
    }

    fn input_jacobian(&self, input: Tensor<B, 2>) -> Tensor<B, 3> {
        let n = input.dims()[0];
        let tangent = tangent_seed::<B>(n, &input.device());
        let h1 = self.fc1.forward(input).tanh();
        let h2 = self.fc2.forward(h1.clone()).tanh();

        let t = tangent.matmul(self.fc1.weight.val()) * per_direction(tanh_grad(h1));
        let t = t.matmul(self.fc2.weight.val()) * per_direction(tanh_grad(h2));
        let t = t.matmul(self.fc3.weight.val());
        tangents_to_jacobian(t, n)
    }
}

impl<B: Backend> InputJacobian<B> for DomainModel<B> {
    fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = relu(self.fc1.forward(input));
        let x = relu(self.fc2.forward(x));
        let x = relu(self.fc3.forward(x));
        let conversion = sigmoid(self.x_out.forward(x.clone()));
        let weights = softplus(self.m_out.forward(x), 1.0);
        Tensor::cat(vec![conversion, weights], 1)
    }

    fn input_jacobian(&self, input: Tensor<B, 2>) -> Tensor<B, 3> {
        let n = input.dims()[0];
        let tangent = tangent_seed::<B>(n, &input.device());
        let z1 = self.fc1.forward(input);
        let z2 = self.fc2.forward(relu(z1.clone()));
        let z3 = self.fc3.forward(relu(z2.clone()));
        let h3 = relu(z3.clone());
        let conversion = sigmoid(self.x_out.forward(h3.clone()));
        let z_m = self.m_out.forward(h3);

        let t = tangent.matmul(self.fc1.weight.val()) * per_direction(relu_grad(z1));
        let t = t.matmul(self.fc2.weight.val()) * per_direction(relu_grad(z2));
        let t = t.matmul(self.fc3.weight.val()) * per_direction(relu_grad(z3));
        let sigmoid_grad = conversion.clone() * (conversion.ones_like() - conversion);
        let t_x = t.clone().matmul(self.x_out.weight.val()) * per_direction(sigmoid_grad);
        // d softplus(z) / dz = sigmoid(z)
        let t_m = t.matmul(self.m_out.weight.val()) * per_direction(sigmoid(z_m));
        tangents_to_jacobian(Tensor::cat(vec![t_x, t_m], 1), n)
    }
}

/// 入力方向ごとの単位接ベクトル `[5N, 5]`。行 `j * N + i` はサンプル `i` の方向 `j`。
fn tangent_seed<B: Backend>(n: usize, device: &B::Device) -> Tensor<B, 2> {
    let mut data = vec![0.0f32; INPUT_DIM * n * INPUT_DIM];
    for j in 0..INPUT_DIM {
        for i in 0..n {
            data[(j * n + i) * INPUT_DIM + j] = 1.0;
        }
    }
    Tensor::from_data(TensorData::new(data, [INPUT_DIM * n, INPUT_DIM]), device)
}

/// `[N, W]` の局所微分を5方向ぶん縦に並べて `[5N, W]` にします。
fn per_direction<B: Backend>(local: Tensor<B, 2>) -> Tensor<B, 2> {
    local.repeat_dim(0, INPUT_DIM)
}

fn tanh_grad<B: Backend>(activated: Tensor<B, 2>) -> Tensor<B, 2> {
    activated.ones_like() - activated.powf_scalar(2.0)
}

fn relu_grad<B: Backend>(pre_activation: Tensor<B, 2>) -> Tensor<B, 2> {
    pre_activation.greater_elem(0.0).float()
}

/// `[5N, 6]` の接ベクトルを `[N, 6, 5]` のヤコビアンに並べ替えます。
fn tangents_to_jacobian<B: Backend>(tangents: Tensor<B, 2>, n: usize) -> Tensor<B, 3> {
    tangents
        .reshape([INPUT_DIM, n, OUTPUT_DIM])
        .swap_dims(0, 1)
        .swap_dims(1, 2)
}
