use crate::cli::{RecordArgs, RecordFormat, RecordSource};
use crate::commands::stop_on_ctrl_c;
use crate::exit_codes;
use eegstream::streaming::{
    ConsumerHandle, DownsampleTransform, FileFormat, FileSink, PeriodicAnalysisTransform,
    SourceConfig,
};
use eegstream::{BandPowerAnalyzer, DeviceProfile, Pipeline, Producer, RunLimit, Source, StreamResult};
use std::path::Path;
use std::sync::Arc;

fn file_format(args: &RecordArgs) -> FileFormat {
    match args.format {
        Some(RecordFormat::Csv) => FileFormat::Csv,
        Some(RecordFormat::Json) => FileFormat::JsonLines,
        None => FileFormat::from_path(Path::new(&args.output)),
    }
}

/// source -> [downsample | analysis] -> file
fn build(args: &RecordArgs, profile: DeviceProfile) -> StreamResult<Pipeline> {
    let source_config = match args.source {
        RecordSource::Simulated => SourceConfig::Simulated {
            device: profile.clone(),
            sample_rate: args.sample_rate,
            seed: args.seed,
        },
        RecordSource::Random => SourceConfig::Random {
            sample_rate: args.sample_rate,
            channel_count: args.channels,
            seed: args.seed,
        },
    };
    let mut source = Source::from_config("recording", source_config)?;
    let sink = ConsumerHandle::new(FileSink::new(
        "file",
        &args.output,
        file_format(args),
        args.append,
    )?);

    if let Some(target_rate) = args.downsample {
        let mut downsample = DownsampleTransform::from_rates(
            "downsample",
            args.sample_rate,
            target_rate,
            source.output_schema(),
        )?;
        downsample.subscribe(sink)?;
        source.subscribe(ConsumerHandle::new(downsample))?;
    } else if args.analysis {
        let mut analysis = PeriodicAnalysisTransform::new(
            "analysis",
            Arc::new(BandPowerAnalyzer),
            profile,
            args.sample_rate.round() as usize,
            args.window_seconds,
        )?;
        analysis.subscribe(sink)?;
        source.subscribe(ConsumerHandle::new(analysis))?;
    } else {
        source.subscribe(sink)?;
    }

    let mut pipeline = Pipeline::new();
    pipeline.add_source(source)?;
    Ok(pipeline)
}

pub async fn execute(args: RecordArgs) -> i32 {
    let Some(profile) = DeviceProfile::from_name(&args.device) else {
        eprintln!(
            "Error: unknown device '{}' (expected muse, crown or generic-N)",
            args.device
        );
        return exit_codes::INPUT_ERROR;
    };
    if !(args.sample_rate > 0.0) || !(args.duration >= 0.0) {
        eprintln!("Error: --sample-rate must be positive and --duration zero or positive");
        return exit_codes::INPUT_ERROR;
    }

    let mut pipeline = match build(&args, profile) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::for_error(&e);
        }
    };

    if !args.quiet {
        eprintln!("Recording to {}...", args.output);
        eprintln!("  Source: {:?} @ {} Hz", args.source, args.sample_rate);
        if args.duration > 0.0 {
            eprintln!("  Duration: {}s", args.duration);
        }
    }

    stop_on_ctrl_c(&pipeline);

    match pipeline
        .run(RunLimit::from_seconds(args.duration, args.sample_rate))
        .await
    {
        Ok(summaries) => {
            if !args.quiet {
                let envelopes: u64 = summaries.iter().map(|s| s.envelopes).sum();
                eprintln!("Recorded {} samples to {}", envelopes, args.output);
            }
            exit_codes::SUCCESS
        }
        Err(e) => {
            eprintln!("Recording failed: {}", e);
            exit_codes::for_error(&e)
        }
    }
}
