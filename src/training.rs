use std::fs;
use std::path::Path;
use std::time::Instant;

use burn::backend::{Autodiff, NdArray};
use burn::module::{AutodiffModule, Module};
use burn::nn::loss::{MseLoss, Reduction};
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::Backend;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::{ElementConversion, Tensor};
use plotters::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::collocation::{CollocationSampler, SamplingRanges};
use crate::config::TrainConfig;
use crate::dataset::{Dataset, Partition};
use crate::error::{PcinnError, Result};
use crate::metrics::{LossHistory, MetricsSummary, TrainingHistory, write_json};
use crate::model::{DomainModel, DomainModelConfig, InputJacobian, SurrogateModel, SurrogateModelConfig};
use crate::pinn::jacobian_loss;
use crate::scaler::FeatureScaler;
use crate::{
    DOMAIN_MODEL_STEM, LOSS_GRAPH_FILENAME, LOSS_HISTORY_FILENAME, METRICS_FILENAME, NN_MODEL_STEM,
    PCINN_MODEL_STEM,
};

type MyBackend = Autodiff<NdArray<f32>>;

/// コロケーション用乱数列を初期化用と分けるためのシード攪拌値。
const COLLOCATION_STREAM: u64 = 0x9E37_79B9_7F4A_7C15;

/// Adam の epsilon（PyTorch の既定値）。
const ADAM_EPSILON: f32 = 1e-8;

/// 学習・テスト分割をテンソル化したもの。
#[derive(Debug, Clone)]
pub struct TrainingData<B: Backend> {
    pub x_train: Tensor<B, 2>,
    pub y_train: Tensor<B, 2>,
    pub x_test: Tensor<B, 2>,
    pub y_test: Tensor<B, 2>,
}

impl<B: Backend> TrainingData<B> {
    /// 分割をテンソルに変換します。どちらかが空の場合は損失が定義できないためエラーです。
    pub fn from_partition(partition: &Partition, device: &B::Device) -> Result<Self> {
        if partition.train.is_empty() {
            return Err(PcinnError::Config("学習データが0行です".into()));
        }
        if partition.test.is_empty() {
            return Err(PcinnError::Config(
                "テスト反応に該当する行がありません".into(),
            ));
        }
        let (x_train, y_train) = partition.train.to_tensors(device);
        let (x_test, y_test) = partition.test.to_tensors(device);
        Ok(Self {
            x_train,
            y_train,
            x_test,
            y_test,
        })
    }
}

/// 学習ジョブの結果。
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub metrics: MetricsSummary,
    pub history: TrainingHistory,
}

/// `train`サブコマンドを実行します。
///
/// アセットとデータセットを読み込み、NNとPCINNを順に学習して、
/// 重み・メトリクス・損失履歴を `out_dir` に保存します。
pub fn run(config: &TrainConfig) -> Result<TrainingReport> {
    config.validate()?;
    let device = Default::default();

    // --- アセットとデータセットの準備 ---
    let scaler = FeatureScaler::load(&config.assets_dir)?;
    let domain = load_domain_model::<NdArray<f32>>(&config.assets_dir, &device)?;
    let dataset = Dataset::load(&config.dataset_path, &scaler)?;
    let partition = dataset.partition(config.test_reaction);
    let num_train_rows = partition.train.len();
    let num_test_rows = partition.test.len();
    tracing::info!(
        train = num_train_rows,
        test = num_test_rows,
        test_reaction = config.test_reaction,
        "データを分割しました"
    );
    let data = TrainingData::<MyBackend>::from_partition(&partition, &device)?;
    fs::create_dir_all(&config.out_dir)?;

    // --- モデルの初期化 ---
    let mut init_rng = StdRng::seed_from_u64(config.seed);
    let mut sample_rng = StdRng::seed_from_u64(config.seed ^ COLLOCATION_STREAM);
    let nn_model = SurrogateModelConfig::new().init::<MyBackend, _>(&mut init_rng, &device);
    let pcinn_model = SurrogateModelConfig::new().init::<MyBackend, _>(&mut init_rng, &device);
    let sampler = CollocationSampler::new(SamplingRanges::default(), scaler);

    // --- 学習 ---
    let (nn_model, nn_history) = train_nn(nn_model, &data, config);
    let (pcinn_model, pcinn_history) =
        train_pcinn(pcinn_model, &data, &domain, &sampler, &mut sample_rng, config)?;

    // --- 結果の保存 ---
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    nn_model.save_file(config.out_dir.join(NN_MODEL_STEM), &recorder)?;
    pcinn_model.save_file(config.out_dir.join(PCINN_MODEL_STEM), &recorder)?;

    let history = TrainingHistory {
        nn: nn_history,
        pcinn: pcinn_history,
    };
    write_json(&config.out_dir.join(LOSS_HISTORY_FILENAME), &history)?;

    let mut outputs = vec![
        format!("{NN_MODEL_STEM}.mpk"),
        format!("{PCINN_MODEL_STEM}.mpk"),
        METRICS_FILENAME.to_string(),
        LOSS_HISTORY_FILENAME.to_string(),
    ];
    if config.plot {
        plot_loss_history(&config.out_dir.join(LOSS_GRAPH_FILENAME), &history)
            .map_err(|e| PcinnError::Plot(e.to_string()))?;
        outputs.push(LOSS_GRAPH_FILENAME.to_string());
    }

    let metrics = MetricsSummary {
        dataset_path: fs::canonicalize(&config.dataset_path)?,
        assets_dir: fs::canonicalize(&config.assets_dir)?,
        out_dir: fs::canonicalize(&config.out_dir)?,
        test_reaction: config.test_reaction,
        epochs: config.epochs,
        lr: config.lr,
        jac_samples: config.jac_samples,
        data_weight: config.data_weight,
        jac_weight: config.jac_weight,
        seed: config.seed,
        num_train_rows,
        num_test_rows,
        final_nn_train_loss: history.nn.final_train(),
        final_nn_test_loss: history.nn.final_test(),
        final_pcinn_train_loss: history.pcinn.final_train(),
        final_pcinn_test_loss: history.pcinn.final_test(),
        final_pcinn_jac_loss: history.pcinn.final_jac(),
        outputs,
    };
    write_json(&config.out_dir.join(METRICS_FILENAME), &metrics)?;
    tracing::info!(out_dir = %metrics.out_dir.display(), "学習結果を保存しました");

    Ok(TrainingReport { metrics, history })
}

/// `assets_dir` から凍結済みのドメインモデルを読み込みます。
pub fn load_domain_model<B: Backend>(assets_dir: &Path, device: &B::Device) -> Result<DomainModel<B>> {
    let path = assets_dir.join(format!("{DOMAIN_MODEL_STEM}.mpk"));
    if !path.exists() {
        return Err(PcinnError::Asset {
            path,
            reason: "ファイルが見つかりません".into(),
        });
    }
    // 初期値はファイルの重みで上書きされる
    let skeleton = DomainModelConfig::new().init::<B, _>(&mut StdRng::seed_from_u64(0), device);
    let model = skeleton
        .load_file(
            &path,
            &NamedMpkFileRecorder::<FullPrecisionSettings>::new(),
            device,
        )
        .map_err(|e| PcinnError::Asset {
            path: path.clone(),
            reason: e.to_string(),
        })?;
    tracing::info!(path = %path.display(), "ドメインモデルをロードしました");
    Ok(model)
}

/// データ損失のみで代理モデルを学習します。
pub fn train_nn<B: AutodiffBackend>(
    mut model: SurrogateModel<B>,
    data: &TrainingData<B>,
    config: &TrainConfig,
) -> (SurrogateModel<B>, LossHistory) {
    let mut optim = optimizer_config().init();
    let mut history = LossHistory::default();
    let training_start = Instant::now();

    tracing::info!(epochs = config.epochs, "NNの学習を開始します");
    for epoch in 1..=config.epochs {
        let pred = model.forward(data.x_train.clone());
        let loss = MseLoss::new().forward(pred, data.y_train.clone(), Reduction::Mean);
        let train_loss: f32 = loss.clone().into_scalar().elem();

        let grads = GradientsParams::from_grads(loss.backward(), &model);
        model = optim.step(config.lr, model, grads);

        let test_loss = eval_test_loss(&model, data);
        history.train.push(train_loss);
        history.test.push(test_loss);

        if should_log(epoch, config) {
            tracing::info!(epoch, train_loss, test_loss, "NN");
        }
    }
    tracing::info!(elapsed = ?training_start.elapsed(), "NNの学習が完了しました");

    (model, history)
}

/// データ損失とヤコビアン整合損失の重み付き和で代理モデルを学習します。
///
/// コロケーション点は毎エポック新しくサンプリングします。
pub fn train_pcinn<B: AutodiffBackend, R: Rng>(
    mut model: SurrogateModel<B>,
    data: &TrainingData<B>,
    domain: &DomainModel<B::InnerBackend>,
    sampler: &CollocationSampler,
    rng: &mut R,
    config: &TrainConfig,
) -> Result<(SurrogateModel<B>, LossHistory)> {
    let device = data.x_train.device();
    let mut optim = optimizer_config().init();
    let mut history = LossHistory::default();
    let training_start = Instant::now();

    tracing::info!(
        epochs = config.epochs,
        jac_samples = config.jac_samples,
        data_weight = config.data_weight,
        jac_weight = config.jac_weight,
        "PCINNの学習を開始します"
    );
    for epoch in 1..=config.epochs {
        let pred = model.forward(data.x_train.clone());
        let data_loss = MseLoss::new().forward(pred, data.y_train.clone(), Reduction::Mean);

        let points = sampler.sample::<B, _>(config.jac_samples, rng, &device);
        let jac_loss = jacobian_loss(&model, domain, points)?;
        let total_loss = data_loss.clone().mul_scalar(config.data_weight)
            + jac_loss.clone().mul_scalar(config.jac_weight);

        let train_loss: f32 = data_loss.into_scalar().elem();
        let jac_value: f32 = jac_loss.into_scalar().elem();

        let grads = GradientsParams::from_grads(total_loss.backward(), &model);
        model = optim.step(config.lr, model, grads);

        let test_loss = eval_test_loss(&model, data);
        history.train.push(train_loss);
        history.test.push(test_loss);
        history.jac.push(jac_value);

        if should_log(epoch, config) {
            tracing::info!(epoch, train_loss, test_loss, jac_loss = jac_value, "PCINN");
        }
    }
    tracing::info!(elapsed = ?training_start.elapsed(), "PCINNの学習が完了しました");

    Ok((model, history))
}

fn optimizer_config() -> AdamConfig {
    AdamConfig::new().with_epsilon(ADAM_EPSILON)
}

/// 推論モード（勾配なし）でのテスト損失。
fn eval_test_loss<B: AutodiffBackend>(model: &SurrogateModel<B>, data: &TrainingData<B>) -> f32 {
    let model = model.valid();
    let pred = model.forward(data.x_test.clone().inner());
    MseLoss::new()
        .forward(pred, data.y_test.clone().inner(), Reduction::Mean)
        .into_scalar()
        .elem()
}

fn should_log(epoch: usize, config: &TrainConfig) -> bool {
    epoch == config.epochs || (config.log_interval > 0 && epoch % config.log_interval == 0)
}

/// 学習過程の損失をグラフとしてPNGファイルに出力します。
fn plot_loss_history(
    path: &Path,
    history: &TrainingHistory,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let series: [(&str, &[f32], RGBColor); 5] = [
        ("NN Train", &history.nn.train, RED),
        ("NN Test", &history.nn.test, MAGENTA),
        ("PCINN Train", &history.pcinn.train, BLUE),
        ("PCINN Test", &history.pcinn.test, CYAN),
        ("PCINN Jacobian", &history.pcinn.jac, GREEN),
    ];
    let log_values = series
        .iter()
        .flat_map(|(_, values, _)| values.iter())
        .filter(|v| v.is_finite() && **v > 0.0)
        .map(|v| v.log10());
    let (min_log_loss, max_log_loss) = log_values
        .fold(None, |acc: Option<(f32, f32)>, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
        .unwrap_or((-6.0, 0.0));
    let epochs = history.nn.epochs().max(history.pcinn.epochs());

    let root = BitMapBackend::new(path, (800, 600)).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption("Loss History", ("sans-serif", 40).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(0..epochs, (min_log_loss - 0.5)..(max_log_loss + 0.5))?;
    chart
        .configure_mesh()
        .y_desc("Loss (log10 scale)")
        .x_desc("Epochs")
        .draw()?;
    for (label, values, color) in series {
        chart
            .draw_series(LineSeries::new(
                values
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| v.is_finite() && **v > 0.0)
                    .map(|(i, &val)| (i, val.log10())),
                &color,
            ))?
            .label(label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }
    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;
    root.present()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Record;

    type TestBackend = Autodiff<NdArray<f32>>;

    fn scaler() -> FeatureScaler {
        FeatureScaler::new([0.5, 5.0, 0.005, 323.0, 300.0], [5.0, 9.5, 0.1, 363.0, 36000.0])
            .unwrap()
    }

    fn dataset() -> Dataset {
        let records = (0..12)
            .map(|i| {
                let m = 1.0 + 0.3 * i as f32;
                Record {
                    inputs: [m, 10.0 - m, 0.02, 333.0 + i as f32, 1800.0 * (i + 1) as f32],
                    reaction: (i % 4 + 1) as f64,
                    outputs: [0.1 * (i % 9) as f32, 1.0e4, 2.0e4, 3.0e4, 4.0e4, 1.9e4],
                }
            })
            .collect();
        Dataset::from_records(records, &scaler()).unwrap()
    }

    fn config(epochs: usize) -> TrainConfig {
        TrainConfig {
            epochs,
            jac_samples: 8,
            lr: 1e-3,
            ..TrainConfig::new("unused.csv")
        }
    }

    #[test]
    fn empty_test_partition_is_rejected() {
        let partition = dataset().partition(99);
        let err = TrainingData::<TestBackend>::from_partition(&partition, &Default::default())
            .unwrap_err();
        assert!(matches!(err, PcinnError::Config(_)));
    }

    #[test]
    fn plain_regime_records_one_loss_per_epoch() {
        let device = Default::default();
        let data = TrainingData::<TestBackend>::from_partition(&dataset().partition(4), &device)
            .unwrap();
        let model = SurrogateModelConfig::new().init(&mut StdRng::seed_from_u64(0), &device);
        let (_, history) = train_nn(model, &data, &config(20));
        assert_eq!(history.train.len(), 20);
        assert_eq!(history.test.len(), 20);
        assert!(history.jac.is_empty());
        assert!(history.is_finite());
        assert!(history.train[19] < history.train[0]);
    }

    #[test]
    fn physics_regime_records_jacobian_loss() {
        let device = Default::default();
        let data = TrainingData::<TestBackend>::from_partition(&dataset().partition(4), &device)
            .unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let model = SurrogateModelConfig::new().init(&mut rng, &device);
        let domain = DomainModelConfig::new().init::<NdArray<f32>, _>(&mut rng, &device);
        let sampler = CollocationSampler::new(SamplingRanges::default(), scaler());
        let (_, history) =
            train_pcinn(model, &data, &domain, &sampler, &mut rng, &config(5)).unwrap();
        assert_eq!(history.jac.len(), 5);
        assert!(history.jac.iter().all(|v| *v >= 0.0));
        assert!(history.is_finite());
    }

    #[test]
    fn optimizer_uses_torch_epsilon() {
        let value = serde_json::to_value(optimizer_config()).unwrap();
        let epsilon = value["epsilon"].as_f64().unwrap();
        assert!((epsilon - 1e-8).abs() < 1e-12, "{epsilon}");
    }

    #[test]
    fn fresh_collocation_batch_is_drawn_every_epoch() {
        let device = Default::default();
        let data = TrainingData::<TestBackend>::from_partition(&dataset().partition(4), &device)
            .unwrap();
        let mut init_rng = StdRng::seed_from_u64(3);
        let model = SurrogateModelConfig::new().init(&mut init_rng, &device);
        let domain = DomainModelConfig::new().init::<NdArray<f32>, _>(&mut init_rng, &device);
        let sampler = CollocationSampler::new(SamplingRanges::default(), scaler());
        let config = config(3);

        let mut rng = StdRng::seed_from_u64(11);
        let mut replay = rng.clone();
        train_pcinn(model, &data, &domain, &sampler, &mut rng, &config).unwrap();

        let batches = (0..config.epochs)
            .map(|_| sampler.sample_raw(config.jac_samples, &mut replay))
            .collect::<Vec<_>>();
        assert_ne!(batches[0], batches[1]);
        assert_ne!(batches[1], batches[2]);
        // 3エポックぶんのバッチを引いた後の乱数状態と一致する
        assert_eq!(rng.random::<u64>(), replay.random::<u64>());
    }

    #[test]
    fn jacobian_only_training_reduces_jacobian_loss() {
        let device = Default::default();
        let data = TrainingData::<TestBackend>::from_partition(&dataset().partition(4), &device)
            .unwrap();
        let mut rng = StdRng::seed_from_u64(2);
        let model = SurrogateModelConfig::new().init(&mut rng, &device);
        let domain = DomainModelConfig::new().init::<NdArray<f32>, _>(&mut rng, &device);
        let sampler = CollocationSampler::new(SamplingRanges::default(), scaler());
        let config = TrainConfig {
            data_weight: 0.0,
            jac_samples: 64,
            lr: 1e-2,
            ..config(100)
        };
        let (_, history) = train_pcinn(model, &data, &domain, &sampler, &mut rng, &config).unwrap();
        let first = history.jac[..10].iter().sum::<f32>();
        let last = history.jac[90..].iter().sum::<f32>();
        assert!(last < first, "{first} -> {last}");
    }

    #[test]
    fn missing_domain_weights_is_an_asset_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_domain_model::<NdArray<f32>>(dir.path(), &Default::default()).unwrap_err();
        assert!(matches!(err, PcinnError::Asset { .. }));
    }

    #[test]
    fn domain_weights_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let domain = DomainModelConfig::new().init::<NdArray<f32>, _>(&mut StdRng::seed_from_u64(5), &device);
        let x = Tensor::<NdArray<f32>, 2>::ones([2, 5], &device);
        let expected = domain.forward(x.clone()).into_data().to_vec::<f32>().unwrap();
        domain
            .save_file(
                dir.path().join(DOMAIN_MODEL_STEM),
                &NamedMpkFileRecorder::<FullPrecisionSettings>::new(),
            )
            .unwrap();
        let loaded = load_domain_model::<NdArray<f32>>(dir.path(), &device).unwrap();
        assert_eq!(loaded.forward(x).into_data().to_vec::<f32>().unwrap(), expected);
    }
}
