use crate::cli::RunArgs;
use crate::commands::stop_on_ctrl_c;
use crate::exit_codes;
use crate::output;
use eegstream::{PipelineConfig, RunLimit};
use std::time::Duration;

pub async fn execute(args: RunArgs) -> i32 {
    if !(args.duration >= 0.0) {
        eprintln!("Error: --duration must be zero or positive");
        return exit_codes::INPUT_ERROR;
    }

    let config = match PipelineConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::INPUT_ERROR;
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return exit_codes::INPUT_ERROR;
    }

    if args.check {
        if !args.quiet {
            eprintln!(
                "{} is valid: {} sources, {} transforms, {} sinks",
                args.config,
                config.sources.len(),
                config.transforms.len(),
                config.sinks.len()
            );
        }
        return exit_codes::SUCCESS;
    }

    let mut pipeline = match config.build().await {
        Ok(pipeline) => pipeline,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::for_error(&e);
        }
    };

    let limit = if args.duration > 0.0 {
        RunLimit::WallTime(Duration::from_secs_f64(args.duration))
    } else {
        RunLimit::Indefinite
    };

    if !args.quiet {
        eprintln!("Running pipeline from {}...", args.config);
        eprintln!("  Sources: {}", pipeline.source_names().join(", "));
        match limit {
            RunLimit::WallTime(d) => eprintln!("  Duration: {:.1}s", d.as_secs_f64()),
            _ => eprintln!("  Duration: until the sources end (Ctrl-C to stop)"),
        }
    }

    stop_on_ctrl_c(&pipeline);

    match pipeline.run(limit).await {
        Ok(summaries) => {
            if !args.quiet {
                for summary in &summaries {
                    eprintln!(
                        "  {}: {} envelopes in {:.2}s ({:?})",
                        summary.source, summary.envelopes, summary.elapsed_secs, summary.outcome
                    );
                }
            }
            if args.json {
                return output::print_json(&summaries, false);
            }
            exit_codes::SUCCESS
        }
        Err(e) => {
            eprintln!("Pipeline failed: {}", e);
            exit_codes::for_error(&e)
        }
    }
}
