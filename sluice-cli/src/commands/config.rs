use super::PipelineArgs;
use crate::output;

use clap::Args;
use color_eyre::eyre::Result;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(flatten)]
    pub pipeline: PipelineArgs,

    /// Print the parameters as a JSON object
    #[arg(long)]
    pub json: bool,
}

/// Print the flat parameter map after every layer has been applied
pub fn execute(args: ConfigArgs) -> Result<()> {
    let loaded = args.pipeline.load()?;
    let config = loaded.config;

    if args.json {
        let map: serde_json::Map<String, serde_json::Value> = config
            .params
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
            .collect();
        println!("{}", serde_json::to_string_pretty(&map)?);
        return Ok(());
    }

    output::header(&format!("Configuration: {}", loaded.pipeline.name));
    output::note(&format!("  work_dir:  {}", config.work_dir.display()));
    output::note(&format!("  state_dir: {}", config.state_dir().display()));
    output::note(&format!(
        "  max_jobs:  {} ({})",
        config.settings.max_jobs,
        format!("{:?}", config.settings.mode).to_lowercase()
    ));
    if let Some(path) = sluice_engine::ConfigLoader::user_params_path() {
        if path.is_file() {
            output::note(&format!("  user params: {}", path.display()));
        }
    }
    eprintln!();

    let width = config.params.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    for (key, value) in config.params.iter() {
        println!("{:<width$} = {}", key, value, width = width);
    }
    Ok(())
}
