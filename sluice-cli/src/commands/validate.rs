use super::PipelineArgs;
use crate::output;

use clap::Args;
use color_eyre::eyre::Result;
use sluice_engine::TaskGraph;

#[derive(Args, Debug)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

pub fn execute(args: ValidateArgs) -> Result<()> {
    let pipeline = args.pipeline.parse_pipeline()?;

    output::check(&format!("Syntax valid ({})", args.pipeline.pipeline.display()));
    output::check(&format!("Pipeline: {}", pipeline.name));
    output::check(&format!("{} tasks declared", pipeline.tasks.len()));

    let graph = match TaskGraph::build(&pipeline.tasks) {
        Ok(graph) => graph,
        Err(e) => {
            output::error(&e.to_string());
            std::process::exit(1);
        }
    };
    output::check("Dependencies resolve and are acyclic");

    eprintln!();
    for (index, level) in graph.levels().iter().enumerate() {
        let names: Vec<String> = level.iter().map(|node| node.name().to_string()).collect();
        output::level_header(index, &names);
        for node in level {
            let decl = &node.declaration;
            let deps = if node.dependencies.is_empty() {
                String::new()
            } else {
                format!(" <- {}", node.dependencies.join(", "))
            };
            output::note(&format!(
                "    {} ({}, {} steps){}",
                node.name(),
                decl.kind,
                decl.commands.len(),
                deps
            ));
        }
    }

    eprintln!();
    output::summary(true, "Pipeline is valid");
    Ok(())
}
