//! Shared fixtures for the end-to-end tests: a temporary working directory,
//! a configuration rooted in it, and helpers to run a registry against it.

#![allow(dead_code)]

use sluice_engine::{
    ConfigLoader, EngineConfig, EngineResult, EngineSettings, JobRunner, RunOptions, RunReport,
    Scheduler, TaskGraph, TaskRegistry,
};

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

pub struct Workspace {
    pub dir: TempDir,
    pub config: Arc<EngineConfig>,
}

impl Workspace {
    pub fn new() -> Self {
        Self::with_settings(EngineSettings::default())
    }

    pub fn with_settings(settings: EngineSettings) -> Self {
        let dir = TempDir::new().unwrap();
        let config = ConfigLoader::new()
            .with_settings(settings)
            .with_work_dir(dir.path())
            .build()
            .unwrap();
        Self {
            dir,
            config: Arc::new(config),
        }
    }

    pub fn root(&self) -> &Path {
        &self.config.work_dir
    }

    pub fn write(&self, relative: &str, content: &str) {
        let path = self.root().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    pub fn read(&self, relative: &str) -> String {
        std::fs::read_to_string(self.root().join(relative)).unwrap()
    }

    pub fn exists(&self, relative: &str) -> bool {
        self.root().join(relative).exists()
    }

    /// Move a file's mtime into the future so everything built from it is outdated
    pub fn touch_later(&self, relative: &str) {
        let file = std::fs::File::options()
            .write(true)
            .open(self.root().join(relative))
            .unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(30))
            .unwrap();
    }

    pub async fn run(&self, registry: &TaskRegistry) -> RunReport {
        self.run_with(registry, RunOptions::default()).await
    }

    pub async fn run_with(&self, registry: &TaskRegistry, options: RunOptions) -> RunReport {
        self.try_run(registry, options).await.unwrap()
    }

    /// Like `run_with`, but hands back engine errors instead of panicking
    pub async fn try_run(
        &self,
        registry: &TaskRegistry,
        options: RunOptions,
    ) -> EngineResult<RunReport> {
        let graph = TaskGraph::build(registry).unwrap();
        let runner = JobRunner::from_config(self.config.clone()).unwrap();
        Scheduler::new(self.config.clone(), Arc::new(runner))
            .with_options(options)
            .run(&graph)
            .await
    }
}

pub fn registry(builders: Vec<sluice_engine::TaskBuilder>) -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    for builder in builders {
        registry.add(builder).unwrap();
    }
    registry
}
