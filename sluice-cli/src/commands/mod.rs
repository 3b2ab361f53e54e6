// CLI commands

pub mod checkpoints;
pub mod config;
pub mod run;
pub mod show;
pub mod validate;

use crate::output;

use clap::Args;
use color_eyre::eyre::{Context, Result};
use sluice_engine::{ConfigLoader, EngineConfig, Pipeline, PipelineParser};

use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Arguments shared by every command that loads a pipeline
#[derive(Args, Debug, Clone)]
pub struct PipelineArgs {
    /// Path to the pipeline file
    #[arg(short = 'p', long = "pipeline", default_value = "pipeline.yml", env = "SLUICE_PIPELINE")]
    pub pipeline: PathBuf,

    /// Parameter file layered over the pipeline's params (repeatable)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Vec<PathBuf>,

    /// Parameter override, e.g. --set genome=hg38 (repeatable)
    #[arg(short = 's', long = "set", value_name = "KEY=VALUE")]
    pub set: Vec<String>,

    /// Working directory relative paths are resolved against
    #[arg(short = 'C', long = "work-dir")]
    pub work_dir: Option<PathBuf>,
}

/// A parsed pipeline with its resolved configuration
pub struct Loaded {
    pub pipeline: Pipeline,
    pub config: Arc<EngineConfig>,
}

impl PipelineArgs {
    /// Parse the pipeline file, printing parse errors the way `validate` does
    pub fn parse_pipeline(&self) -> Result<Pipeline> {
        if !self.pipeline.exists() {
            color_eyre::eyre::bail!("Pipeline file not found: {}", self.pipeline.display());
        }

        match PipelineParser::parse_file(&self.pipeline) {
            Ok(pipeline) => Ok(pipeline),
            Err(e) => {
                output::error(&format!("Failed to parse {}", self.pipeline.display()));
                eprint!("{}", e);
                std::process::exit(1);
            }
        }
    }

    /// Parse the pipeline and layer params: user file, pipeline, --config, --set
    pub fn load(&self) -> Result<Loaded> {
        let pipeline = self.parse_pipeline()?;

        let mut loader = ConfigLoader::new()
            .with_user_params()
            .wrap_err("Failed to load user parameters")?
            .with_settings(pipeline.settings.clone())
            .with_params(&pipeline.params);

        for file in &self.config {
            loader = loader
                .with_params_file(file)
                .wrap_err_with(|| format!("Failed to load config file {}", file.display()))?;
        }
        for assignment in &self.set {
            loader = loader.with_assignment(assignment)?;
        }

        if let Some(dir) = self.work_dir(&pipeline) {
            loader = loader.with_work_dir(dir);
        }

        let config = loader.build().wrap_err("Invalid configuration")?;
        tracing::debug!(
            pipeline = %pipeline.name,
            work_dir = %config.work_dir.display(),
            params = config.params.len(),
            "configuration resolved"
        );

        Ok(Loaded {
            pipeline,
            config: Arc::new(config),
        })
    }

    /// --work-dir wins; a relative `settings.work_dir` is taken from the pipeline file's directory
    fn work_dir(&self, pipeline: &Pipeline) -> Option<PathBuf> {
        if let Some(dir) = &self.work_dir {
            return Some(dir.clone());
        }
        let configured = pipeline.settings.work_dir.as_ref()?;
        if configured.is_absolute() {
            return Some(configured.clone());
        }
        let base = self.pipeline.parent().unwrap_or(Path::new("."));
        Some(base.join(configured))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PIPELINE: &str = r#"name: layered
settings:
  work_dir: data
params:
  genome: hg19
  reads:
    bc_pattern: NNNXXXXNN
tasks:
  - { name: seed, kind: originate, output: seed.txt, commands: ["touch %(outfile)s"] }
"#;

    fn args(temp: &TempDir) -> PipelineArgs {
        std::fs::create_dir_all(temp.path().join("data")).unwrap();
        let pipeline = temp.path().join("pipeline.yml");
        std::fs::write(&pipeline, PIPELINE).unwrap();
        PipelineArgs {
            pipeline,
            config: Vec::new(),
            set: Vec::new(),
            work_dir: None,
        }
    }

    #[test]
    fn test_later_layers_override_params() {
        let temp = TempDir::new().unwrap();
        let mut args = args(&temp);

        let extra = temp.path().join("extra.yml");
        std::fs::write(&extra, "genome: hg38\nreads:\n  bc_pattern: NNNN\n").unwrap();
        args.config.push(extra);
        args.set.push("genome=mm10".to_string());

        let loaded = args.load().unwrap();
        assert_eq!(loaded.config.params.get("genome"), Some("mm10"));
        assert_eq!(loaded.config.params.get("reads_bc_pattern"), Some("NNNN"));
    }

    #[test]
    fn test_relative_work_dir_follows_pipeline_file() {
        let temp = TempDir::new().unwrap();
        let args = args(&temp);

        let loaded = args.load().unwrap();
        let expected = temp.path().join("data").canonicalize().unwrap();
        assert_eq!(loaded.config.work_dir, expected);
    }

    #[test]
    fn test_work_dir_flag_wins() {
        let temp = TempDir::new().unwrap();
        let mut args = args(&temp);
        args.work_dir = Some(temp.path().to_path_buf());

        let loaded = args.load().unwrap();
        assert_eq!(loaded.config.work_dir, temp.path().canonicalize().unwrap());
    }

    #[test]
    fn test_bad_assignment_is_an_error() {
        let temp = TempDir::new().unwrap();
        let mut args = args(&temp);
        args.set.push("no-equals-sign".to_string());
        assert!(args.load().is_err());
    }
}
