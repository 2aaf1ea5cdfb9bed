use burn::nn::loss::{MseLoss, Reduction};
use burn::tensor::Tensor;
use burn::tensor::backend::AutodiffBackend;

use crate::error::{PcinnError, Result};
use crate::model::InputJacobian;
use crate::{INPUT_DIM, OUTPUT_DIM};

/// ヤコビアン整合損失を計算します。
///
/// コロケーション点 `points` (`[N, 5]`) における代理モデルとドメインモデルの
/// ヤコビアン (`[N, 6, 5]`) の全要素についての二乗平均誤差を返します。
/// ドメインモデルは非autodiffバックエンド上で評価し、定数としてグラフに
/// 取り込むため、勾配は代理モデルのパラメータにのみ流れます。
pub fn jacobian_loss<B, S, D>(surrogate: &S, domain: &D, points: Tensor<B, 2>) -> Result<Tensor<B, 1>>
where
    B: AutodiffBackend,
    S: InputJacobian<B>,
    D: InputJacobian<B::InnerBackend>,
{
    let [n, dim] = points.dims();
    if dim != INPUT_DIM {
        return Err(PcinnError::Shape(format!(
            "コロケーション点の次元は {} である必要がありますが {} でした",
            INPUT_DIM, dim
        )));
    }
    if n == 0 {
        return Err(PcinnError::Shape("コロケーション点が空です".to_string()));
    }

    let theory = Tensor::<B, 3>::from_inner(domain.input_jacobian(points.clone().inner()));
    let model = surrogate.input_jacobian(points);
    Ok(MseLoss::new().forward(model, theory, Reduction::Mean))
}

/// 逆伝播で求めた参照用ヤコビアン `[N, 6, 5]`。
///
/// 出力チャネルごとにバッチ和を逆伝播するので、サンプル `i` の勾配は
/// サンプル `i` の入力にのみ依存します。結果はグラフから切り離されます。
pub fn autodiff_jacobian<B, M>(model: &M, points: Tensor<B, 2>) -> Tensor<B::InnerBackend, 3>
where
    B: AutodiffBackend,
    M: InputJacobian<B>,
{
    let n = points.dims()[0];
    let rows = (0..OUTPUT_DIM)
        .map(|k| {
            let coords_grad = points.clone().detach().require_grad();
            let output = model.forward(coords_grad.clone());
            let grads = output.slice([0..n, k..k + 1]).sum().backward();
            coords_grad
                .grad(&grads)
                .unwrap_or_else(|| Tensor::zeros([n, INPUT_DIM], &points.device()))
        })
        .collect::<Vec<_>>();
    Tensor::stack(rows, 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DomainModelConfig, SurrogateModelConfig};
    use burn::backend::{Autodiff, NdArray};
    use burn::module::AutodiffModule;
    use burn::optim::{AdamConfig, GradientsParams, Optimizer};
    use burn::tensor::{Distribution, ElementConversion};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    type TestBackend = Autodiff<NdArray<f32>>;

    fn points(n: usize) -> Tensor<TestBackend, 2> {
        Tensor::random([n, INPUT_DIM], Distribution::Uniform(0.0, 1.0), &Default::default())
    }

    #[test]
    fn loss_is_non_negative() {
        let device = Default::default();
        let mut rng = StdRng::seed_from_u64(0);
        let surrogate = SurrogateModelConfig::new().init::<TestBackend, _>(&mut rng, &device);
        let domain = DomainModelConfig::new().init::<NdArray<f32>, _>(&mut rng, &device);
        let loss = jacobian_loss(&surrogate, &domain, points(16)).unwrap();
        let value: f32 = loss.into_scalar().elem();
        assert!(value >= 0.0);
        assert!(value.is_finite());
    }

    #[test]
    fn identical_functions_have_zero_loss() {
        let device = Default::default();
        let mut rng = StdRng::seed_from_u64(1);
        let surrogate = SurrogateModelConfig::new().init::<TestBackend, _>(&mut rng, &device);
        let frozen_copy = surrogate.valid();
        let loss = jacobian_loss(&surrogate, &frozen_copy, points(16)).unwrap();
        let value: f32 = loss.into_scalar().elem();
        assert_eq!(value, 0.0);
    }

    #[test]
    fn gradient_reaches_surrogate_parameters() {
        let device = Default::default();
        let mut rng = StdRng::seed_from_u64(2);
        let surrogate = SurrogateModelConfig::new().init::<TestBackend, _>(&mut rng, &device);
        let domain = DomainModelConfig::new().init::<NdArray<f32>, _>(&mut rng, &device);
        let loss = jacobian_loss(&surrogate, &domain, points(8)).unwrap();
        let grads = GradientsParams::from_grads(loss.backward(), &surrogate);
        // 3層の重みと隠れ層2層のバイアス。ヤコビアンは出力層のバイアスに依存しない
        assert_eq!(grads.len(), 5);
    }

    #[test]
    fn one_step_on_jacobian_loss_lowers_it() {
        let device = Default::default();
        let mut rng = StdRng::seed_from_u64(5);
        let surrogate = SurrogateModelConfig::new().init::<TestBackend, _>(&mut rng, &device);
        let domain = DomainModelConfig::new().init::<NdArray<f32>, _>(&mut rng, &device);
        let x = points(32);

        let loss = jacobian_loss(&surrogate, &domain, x.clone()).unwrap();
        let before: f32 = loss.clone().into_scalar().elem();
        let grads = GradientsParams::from_grads(loss.backward(), &surrogate);
        let mut optim = AdamConfig::new().with_epsilon(1e-8).init();
        let surrogate = optim.step(1e-4, surrogate, grads);

        let after: f32 = jacobian_loss(&surrogate, &domain, x)
            .unwrap()
            .into_scalar()
            .elem();
        assert!(after < before, "{before} -> {after}");
    }

    #[test]
    fn wrong_input_dimension_is_rejected() {
        let device = Default::default();
        let mut rng = StdRng::seed_from_u64(3);
        let surrogate = SurrogateModelConfig::new().init::<TestBackend, _>(&mut rng, &device);
        let domain = DomainModelConfig::new().init::<NdArray<f32>, _>(&mut rng, &device);
        let bad = Tensor::<TestBackend, 2>::zeros([4, 6], &device);
        let err = jacobian_loss(&surrogate, &domain, bad).unwrap_err();
        assert!(matches!(err, PcinnError::Shape(_)));
    }

    #[test]
    fn reference_jacobian_does_not_mix_samples() {
        let device = Default::default();
        let mut rng = StdRng::seed_from_u64(4);
        let surrogate = SurrogateModelConfig::new().init::<TestBackend, _>(&mut rng, &device);
        let x = points(3);
        let batched = autodiff_jacobian(&surrogate, x.clone());
        let single = autodiff_jacobian(&surrogate, x.slice([1..2, 0..INPUT_DIM]));
        let batched_row = batched.slice([1..2, 0..OUTPUT_DIM, 0..INPUT_DIM]);
        let a = batched_row.into_data().to_vec::<f32>().unwrap();
        let b = single.into_data().to_vec::<f32>().unwrap();
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-6);
        }
    }
}
