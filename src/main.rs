use std::process::ExitCode;

use log::{error, warn};

use webgpu_bench::benchmarks::{catalogue, run_benchmark};
use webgpu_bench::config::{BenchConfig, EXIT_SKIP};
use webgpu_bench::error::BenchError;
use webgpu_bench::gpu::GpuContext;
use webgpu_bench::report::{Report, Summary};

async fn run() -> ExitCode {
    let config = match BenchConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let ctx = match GpuContext::new().await {
        Ok(ctx) => ctx,
        Err(BenchError::NoAdapter) => {
            warn!("No GPU adapter available, skipping benchmarks");
            return ExitCode::from(EXIT_SKIP);
        }
        Err(err) => {
            error!("{err}");
            return ExitCode::FAILURE;
        }
    };

    println!("= Running benchmarks =");
    let mut summary = Summary::default();
    for workload in catalogue() {
        if !config.selects(workload.name()) {
            continue;
        }
        match run_benchmark(&ctx, &config, &workload) {
            Ok(stats) => {
                let report = Report {
                    name: workload.name(),
                    stats,
                };
                println!("{report}");
                summary.push(report);
            }
            Err(err) if err.is_skip() => {
                warn!("Skipping '{}': {err}", workload.name());
                summary.skip(workload.name(), err.to_string());
            }
            Err(err) => {
                error!("Benchmark '{}' failed: {err}", workload.name());
                return ExitCode::FAILURE;
            }
        }
    }

    if !summary.is_empty() {
        println!("\n{summary}");
    }
    ExitCode::SUCCESS
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    pollster::block_on(run())
}
