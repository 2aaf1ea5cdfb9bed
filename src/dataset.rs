//! 実験データの読み込み・前処理・反応IDによる学習/テスト分割。

use std::path::Path;
use std::str::FromStr;

use burn::prelude::Backend;
use burn::tensor::Tensor;

use crate::error::{PcinnError, Result};
use crate::scaler::FeatureScaler;
use crate::{INPUT_DIM, OUTPUT_DIM};

/// 入力カラム（`Reaction` は分割専用でスケーリングしません）。
pub const INPUT_COLUMNS: [&str; INPUT_DIM] = ["[M]", "[S]", "[I]", "temp", "time"];
/// 反応IDカラム。
pub const REACTION_COLUMN: &str = "Reaction";
/// 出力カラム。添字1..6 の分子量統計量は log10 で学習します。
pub const OUTPUT_COLUMNS: [&str; OUTPUT_DIM] = ["X", "Mn", "Mw", "Mz", "Mzplus1", "Mv"];

/// 1件の実験観測値（生の値）。
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub inputs: [f32; INPUT_DIM],
    /// 反応ID。大きなIDでも区別できるよう f64 で保持します。
    pub reaction: f64,
    pub outputs: [f32; OUTPUT_DIM],
}

/// スケーリング済み入力と log10 変換済み出力を保持するデータセット。
#[derive(Debug, Clone)]
pub struct Dataset {
    inputs: Vec<[f32; INPUT_DIM]>,
    reactions: Vec<f64>,
    targets: Vec<[f32; OUTPUT_DIM]>,
}

/// 分割後の片側。`inputs` と `targets` は同じ長さです。
#[derive(Debug, Clone, Default)]
pub struct Split {
    pub inputs: Vec<[f32; INPUT_DIM]>,
    pub targets: Vec<[f32; OUTPUT_DIM]>,
}

/// leave-one-group-out 分割の結果。
#[derive(Debug, Clone)]
pub struct Partition {
    pub train: Split,
    pub test: Split,
}

/// CSV から生のレコードを読み込みます。
///
/// 必須カラムが欠けていれば、最初に見つかった欠落カラム名を含む
/// `Schema` エラーを返します。余分なカラムは無視します。
pub fn read_records(path: &Path) -> Result<Vec<Record>> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| PcinnError::Asset {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let headers = reader.headers()?.clone();
    let column = |name: &str| -> Result<usize> {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| PcinnError::Schema(name.to_string()))
    };

    let mut input_idx = [0usize; INPUT_DIM];
    for (slot, name) in input_idx.iter_mut().zip(INPUT_COLUMNS) {
        *slot = column(name)?;
    }
    let reaction_idx = column(REACTION_COLUMN)?;
    let mut output_idx = [0usize; OUTPUT_DIM];
    for (slot, name) in output_idx.iter_mut().zip(OUTPUT_COLUMNS) {
        *slot = column(name)?;
    }

    let mut records = Vec::new();
    for (row, result) in reader.records().enumerate() {
        let record = result?;
        let mut inputs = [0.0; INPUT_DIM];
        for i in 0..INPUT_DIM {
            inputs[i] = parse_field(&record, input_idx[i], INPUT_COLUMNS[i], row)?;
        }
        let reaction = parse_field(&record, reaction_idx, REACTION_COLUMN, row)?;
        let mut outputs = [0.0; OUTPUT_DIM];
        for i in 0..OUTPUT_DIM {
            outputs[i] = parse_field(&record, output_idx[i], OUTPUT_COLUMNS[i], row)?;
        }
        records.push(Record {
            inputs,
            reaction,
            outputs,
        });
    }
    Ok(records)
}

fn parse_field<T: FromStr>(record: &csv::StringRecord, idx: usize, name: &str, row: usize) -> Result<T> {
    let raw = record.get(idx).unwrap_or("").trim();
    raw.parse::<T>().map_err(|_| {
        PcinnError::Dataset(format!(
            "{}行目のカラム '{}' を数値として読めません: '{}'",
            row + 1,
            name,
            raw
        ))
    })
}

impl Dataset {
    /// CSV を読み込み、前処理済みのデータセットを返します。
    pub fn load(path: &Path, scaler: &FeatureScaler) -> Result<Self> {
        let records = read_records(path)?;
        let dataset = Self::from_records(records, scaler)?;
        tracing::info!(path = %path.display(), rows = dataset.len(), "データセットをロードしました");
        Ok(dataset)
    }

    /// 出力の分子量統計量を log10 に、入力を `scaler` でスケーリングします。
    ///
    /// 非有限の入力・出力と、log10 が定義されない非正の分子量統計量はエラーにします。
    pub fn from_records(records: Vec<Record>, scaler: &FeatureScaler) -> Result<Self> {
        let mut inputs = Vec::with_capacity(records.len());
        let mut reactions = Vec::with_capacity(records.len());
        let mut targets = Vec::with_capacity(records.len());

        for (row, record) in records.into_iter().enumerate() {
            let non_finite = INPUT_COLUMNS
                .iter()
                .zip(record.inputs.iter())
                .chain(OUTPUT_COLUMNS.iter().zip(record.outputs.iter()).take(1))
                .find(|(_, v)| !v.is_finite());
            if let Some((name, value)) = non_finite {
                return Err(PcinnError::Degenerate(format!(
                    "{}行目のカラム '{}' が有限ではありません: {}",
                    row + 1,
                    name,
                    value
                )));
            }
            let mut target = record.outputs;
            for i in 1..OUTPUT_DIM {
                if !target[i].is_finite() || target[i] <= 0.0 {
                    return Err(PcinnError::Degenerate(format!(
                        "{}行目のカラム '{}' が正の有限値ではないため log10 できません: {}",
                        row + 1,
                        OUTPUT_COLUMNS[i],
                        target[i]
                    )));
                }
                target[i] = target[i].log10();
            }
            inputs.push(scaler.scale(&record.inputs));
            reactions.push(record.reaction);
            targets.push(target);
        }

        Ok(Self {
            inputs,
            reactions,
            targets,
        })
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn inputs(&self) -> &[[f32; INPUT_DIM]] {
        &self.inputs
    }

    pub fn targets(&self) -> &[[f32; OUTPUT_DIM]] {
        &self.targets
    }

    /// `Reaction == test_reaction` の行をテスト、それ以外を学習側に振り分けます。
    pub fn partition(&self, test_reaction: i64) -> Partition {
        let held_out = test_reaction as f64;
        let mut train = Split::default();
        let mut test = Split::default();
        for ((input, target), reaction) in self
            .inputs
            .iter()
            .zip(self.targets.iter())
            .zip(self.reactions.iter())
        {
            let side = if *reaction == held_out {
                &mut test
            } else {
                &mut train
            };
            side.inputs.push(*input);
            side.targets.push(*target);
        }
        Partition { train, test }
    }
}

impl Split {
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// `([N, 5], [N, 6])` のテンソル組に変換します。
    pub fn to_tensors<B: Backend>(&self, device: &B::Device) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let n = self.len();
        let x = self.inputs.iter().flatten().copied().collect::<Vec<f32>>();
        let y = self.targets.iter().flatten().copied().collect::<Vec<f32>>();
        (
            Tensor::<B, 1>::from_floats(x.as_slice(), device).reshape([n, INPUT_DIM]),
            Tensor::<B, 1>::from_floats(y.as_slice(), device).reshape([n, OUTPUT_DIM]),
        )
    }
}
