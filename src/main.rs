//! # PCINN 学習・推論プログラム
//!
//! `clap` クレートを利用して、コマンドラインから`train`（学習）と`infer`（推論）の
//! 機能を個別に実行できます。
//!
//! ## 使い方
//!
//! ### 学習
//! ```bash
//! cargo run --release -- train --dataset PMMAordered.csv --assets-dir assets --out-dir models
//! ```
//!
//! ### 推論
//! ```bash
//! cargo run --release -- infer --model pcinn --m 2 --s 8 --i 0.01 --temp 343 --time 3600
//! ```

use clap::Parser;
use pcinn::cli::{Cli, Commands};
use pcinn::{TrainConfig, inference, training};
use tracing_subscriber::EnvFilter;

/// プログラムのエントリーポイント。
///
/// コマンドライン引数を解析し、`train`または`infer`の処理に振り分けます。
fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train(args) => {
            let report = training::run(&TrainConfig::from(args))?;
            println!("{}", serde_json::to_string_pretty(&report.metrics)?);
        }
        Commands::Infer(args) => {
            let prediction = inference::run(
                &args.model_dir,
                &args.assets_dir,
                args.model,
                args.raw_input(),
            )?;
            println!("{}", serde_json::to_string_pretty(&prediction)?);
        }
    }
    Ok(())
}
