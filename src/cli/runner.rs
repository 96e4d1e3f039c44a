use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use slidepro::api;
use slidepro::core::naming::OutputNamer;
use slidepro::core::pipeline::{CancelToken, ConversionJob, ConversionOptions};
use slidepro::core::selector::SelectionRequest;
use slidepro::types::TargetFormat;

use super::args::CliArgs;
use super::errors::AppError;

fn selection_request(args: &CliArgs) -> SelectionRequest {
    match args.scene {
        Some(scene_index) => SelectionRequest::Explicit {
            scene_index,
            level: args.level,
        },
        None => SelectionRequest::Category {
            category: args.category,
            level: args.level,
        },
    }
}

fn conversion_options(args: &CliArgs) -> Result<ConversionOptions, AppError> {
    if args.byte_budget_mb == 0 {
        return Err(AppError::ZeroBudget);
    }
    Ok(ConversionOptions {
        compression: args.compression,
        compression_level: args.compression_level,
        byte_budget: args.byte_budget_mb << 20,
        pyramid: !args.no_pyramid,
    })
}

fn output_name(input: &Path, format: TargetFormat) -> String {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    format!("{}{}", stem, format.extension())
}

fn is_supported_input(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|s| s.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    name.ends_with(".tif") || name.ends_with(".tiff")
}

fn list_scenes(input: &Path) -> Result<(), AppError> {
    let scenes = api::list_scenes(input)?;
    println!("{} scene(s) in {:?}:", scenes.len(), input);
    for scene in scenes {
        println!(
            "  [{}] {} ({}, level {}) {}x{} px, {} channel(s), {}",
            scene.scene_index,
            scene.name,
            scene.category,
            scene.pyramid_level,
            scene.shape.width,
            scene.shape.height,
            scene.shape.channels,
            scene.pixel_type,
        );
    }
    Ok(())
}

pub fn run(args: CliArgs) -> Result<(), Box<dyn std::error::Error>> {
    if args.log {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    }

    if args.list {
        let input = args.input.clone().ok_or(AppError::MissingArgument {
            arg: "--input".to_string(),
        })?;
        list_scenes(&input)?;
        return Ok(());
    }

    let options = conversion_options(&args)?;
    let request = selection_request(&args);
    let namer = OutputNamer::new();
    let cancel = CancelToken::new();

    let batch_mode = args.input_dir.is_some();
    if batch_mode {
        let input_dir = args.input_dir.ok_or(AppError::MissingArgument {
            arg: "--input-dir".to_string(),
        })?;
        let output_dir = args.output_dir.ok_or(AppError::MissingArgument {
            arg: "--output-dir".to_string(),
        })?;
        fs::create_dir_all(&output_dir)?;

        let mut jobs: Vec<ConversionJob> = Vec::new();
        for entry in fs::read_dir(&input_dir)? {
            let path = entry?.path();
            if path.is_file() && is_supported_input(&path) {
                jobs.push(ConversionJob {
                    output: output_dir.join(output_name(&path, args.format)),
                    input: path,
                    request,
                    format: args.format,
                    options: options.clone(),
                });
            } else {
                info!("skipping unsupported entry: {:?}", path);
            }
        }
        if jobs.is_empty() {
            return Err(AppError::EmptyBatch {
                dir: input_dir.display().to_string(),
            }
            .into());
        }

        info!("batch: {} job(s) from {:?}", jobs.len(), input_dir);
        let total = jobs.len();
        let report = api::convert_batch(jobs, &namer, &cancel);
        for job in &report.jobs {
            match &job.result {
                Ok(outcome) => {
                    println!(
                        "ok   {:?} -> {:?} ({} tiles, {} bytes, {} warning(s))",
                        job.input,
                        outcome.output_path,
                        outcome.tiles_written,
                        outcome.bytes_written,
                        outcome.warnings.len()
                    );
                    for warning in &outcome.warnings {
                        warn!("{:?}: {}", job.input, warning);
                    }
                }
                Err(e) => println!("fail {:?}: {}", job.input, e),
            }
        }
        println!(
            "Batch complete: {}/{} succeeded",
            report.succeeded(),
            total
        );
        if report.failed() > 0 {
            return Err(AppError::BatchFailures {
                failed: report.failed(),
                total,
            }
            .into());
        }
    } else {
        let input = args.input.ok_or(AppError::MissingArgument {
            arg: "--input".to_string(),
        })?;
        let output: PathBuf = match args.output {
            Some(output) => output,
            None => input.with_file_name(output_name(&input, args.format)),
        };

        let job = ConversionJob {
            input: input.clone(),
            request,
            output,
            format: args.format,
            options,
        };
        let progress = |done: usize, total: usize| {
            if done == total || done % 64 == 0 {
                info!("progress: {}/{} tiles", done, total);
            }
        };
        let outcome = api::convert(&job, &namer, &cancel, Some(&progress))?;
        for warning in &outcome.warnings {
            warn!("{}", warning);
        }
        println!(
            "Converted {:?} -> {:?} ({} tiles, {} bytes)",
            input, outcome.output_path, outcome.tiles_written, outcome.bytes_written
        );
    }

    Ok(())
}
