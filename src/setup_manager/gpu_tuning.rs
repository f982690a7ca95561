// comfy-package-installer/src/setup_manager/gpu_tuning.rs

use log::{info, warn};

use crate::config::ProcessEnv;
use crate::error::Result;
use crate::manifest::GpuSettings;
use crate::process_manager::{CommandRunner, CommandSpec};

use super::python_utils::pip_install_packages;

pub const CUDA_ALLOC_CONF_VAR: &str = "PYTORCH_CUDA_ALLOC_CONF";
pub const CUDA_ALLOC_CONF_VALUE: &str = "max_split_size_mb:512";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GpuInfo {
    pub name: Option<String>,
    pub cuda_version: Option<String>,
}

/// Asks `nvidia-smi` what GPU and driver-level CUDA version this server has.
/// `None` when the tool is missing or fails.
pub async fn detect_gpu<R: CommandRunner>(runner: &R, env: &ProcessEnv) -> Option<GpuInfo> {
    let query = CommandSpec::new("nvidia-smi", "GPU name query")
        .args(["--query-gpu=name", "--format=csv,noheader"])
        .envs(env);
    let name = match runner.run(&query).await {
        Ok(result) if result.success() => result.stdout.first().map(|line| line.trim().to_string()),
        Ok(result) => {
            warn!("[GPU_TUNING] nvidia-smi failed with {}", result);
            return None;
        }
        Err(e) => {
            warn!("[GPU_TUNING] nvidia-smi not available: {}", e);
            return None;
        }
    };

    let summary = CommandSpec::new("nvidia-smi", "GPU driver query").envs(env);
    let cuda_version = match runner.run(&summary).await {
        Ok(result) if result.success() => parse_cuda_version(&result.stdout),
        _ => None,
    };

    Some(GpuInfo { name, cuda_version })
}

fn parse_cuda_version(lines: &[String]) -> Option<String> {
    lines
        .iter()
        .find(|line| line.contains("CUDA Version:"))
        .and_then(|line| line.split("CUDA Version:").nth(1))
        .and_then(|version| version.split_whitespace().next())
        .map(str::to_string)
}

/// Applies the manifest's GPU settings. Allocator tuning goes into `env` and
/// so only reaches processes this installer starts.
pub async fn apply_gpu_settings<R: CommandRunner>(
    runner: &R,
    settings: &GpuSettings,
    env: &mut ProcessEnv,
) -> Result<()> {
    if !settings.vram_optimize && !settings.xformers {
        info!("[GPU_TUNING] No GPU settings requested");
        return Ok(());
    }

    match detect_gpu(runner, env).await {
        Some(gpu) => info!(
            "[GPU_TUNING] GPU: {}, CUDA: {}",
            gpu.name.as_deref().unwrap_or("unknown"),
            gpu.cuda_version.as_deref().unwrap_or("unknown")
        ),
        None => warn!("[GPU_TUNING] No NVIDIA GPU detected; applying settings anyway"),
    }

    if settings.vram_optimize {
        env.set_tuning(CUDA_ALLOC_CONF_VAR, CUDA_ALLOC_CONF_VALUE);
        info!(
            "[GPU_TUNING] {}={} set for processes started by this installer; export it yourself for other sessions",
            CUDA_ALLOC_CONF_VAR, CUDA_ALLOC_CONF_VALUE
        );
    }

    if settings.xformers {
        pip_install_packages(runner, &["xformers"], env, "xformers install").await?;
        info!("[GPU_TUNING] xformers installed");
    }
    Ok(())
}
