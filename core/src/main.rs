//! CLI entry point for inference-bridge.

use anyhow::{bail, ensure, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::info;

use inference_bridge::cli::{Cli, Commands};
use inference_bridge::error::last_error_message;
use inference_bridge::{ffi, logging, Config, ElementType, Registry, SlotKind, NO_SESSION};

/// Input file layout for `run`.
#[derive(Debug, Deserialize)]
struct InputFile {
    inputs: Vec<Vec<f32>>,
}

/// Slot description printed by `info` and `run`.
#[derive(Debug)]
struct SlotReport {
    index: i32,
    shape: Vec<i32>,
    element_type: i32,
}

fn slots(registry: &Registry, handle: i64, kind: SlotKind) -> Vec<SlotReport> {
    let count = match kind {
        SlotKind::Input => registry.input_count(handle),
        SlotKind::Output => registry.output_count(handle),
    };
    (0..count)
        .map(|index| {
            let mut shape = vec![0; registry.rank(handle, kind, index).max(0) as usize];
            registry.copy_shape(handle, kind, index, &mut shape);
            SlotReport {
                index,
                shape,
                element_type: registry.element_type(handle, kind, index),
            }
        })
        .collect()
}

fn load(registry: &Registry, model: &Path) -> Result<i64> {
    info!("Loading model: {}", model.display());
    let bytes =
        fs::read(model).with_context(|| format!("Failed to read model: {}", model.display()))?;
    let handle = registry.create(&bytes);
    if handle == NO_SESSION {
        bail!(
            "Failed to create interpreter: {}",
            last_error_message().unwrap_or_else(|| "unknown error".to_string())
        );
    }
    Ok(handle)
}

fn check_status(status: i32, what: &str) -> Result<()> {
    ensure!(
        status == 0,
        "{} failed with status {}: {}",
        what,
        status,
        last_error_message().unwrap_or_default()
    );
    Ok(())
}

fn run(registry: &Registry, handle: i64, input: &Path, format: &str) -> Result<()> {
    let input_file: InputFile = serde_json::from_str(
        &fs::read_to_string(input)
            .with_context(|| format!("Failed to read input: {}", input.display()))?,
    )
    .context("Input must be {\"inputs\": [[...], ...]}")?;

    let expected = registry.input_count(handle) as usize;
    ensure!(
        input_file.inputs.len() == expected,
        "Model has {} inputs, input file provides {}",
        expected,
        input_file.inputs.len()
    );

    for (index, data) in input_file.inputs.iter().enumerate() {
        let status = registry.set_input(handle, index as i32, data, data.len() as i32);
        check_status(status, &format!("set_input({})", index))?;
    }

    info!("Running inference...");
    check_status(registry.invoke(handle), "invoke")?;

    let reports = slots(registry, handle, SlotKind::Output);
    let mut outputs = Vec::with_capacity(reports.len());
    for report in &reports {
        let numel: usize = report.shape.iter().map(|&d| d.max(0) as usize).product();
        let what = format!("get_output({})", report.index);
        let values = if report.element_type == ElementType::F32.code() {
            let mut values = vec![0.0f32; numel];
            let status = registry.get_output(handle, report.index, &mut values, numel as i32);
            check_status(status, &what)?;
            serde_json::json!(values)
        } else {
            // Non-float slots are reported as raw native-endian bytes.
            let byte_len = ElementType::from_code(report.element_type)
                .map_or(0, |ty| numel * ty.size());
            let mut bytes = vec![0u8; byte_len];
            let status =
                registry.get_output_bytes(handle, report.index, &mut bytes, byte_len as i32);
            check_status(status, &what)?;
            serde_json::json!({ "bytes": bytes })
        };
        outputs.push(serde_json::json!({
            "index": report.index,
            "shape": report.shape,
            "element_type": report.element_type,
            "values": values,
        }));
    }

    let output = serde_json::json!({
        "num_outputs": outputs.len(),
        "outputs": outputs,
    });
    if format == "pretty" {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{}", serde_json::to_string(&output)?);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    let config = match &cli.config {
        Some(path) => Config::from_yaml_file(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => Config::default(),
    };
    logging::init(&config.logging);

    let registry = ffi::registry();
    registry.configure(config.session.clone());

    match cli.command {
        Commands::Info { model } => {
            let handle = load(registry, &model)?;
            println!("inference-bridge v{}", inference_bridge::VERSION);
            println!("Model: {}", model.display());
            println!("Threads: {}", config.session.num_threads);
            for (label, kind) in [("input", SlotKind::Input), ("output", SlotKind::Output)] {
                for slot in slots(registry, handle, kind) {
                    println!(
                        "  {} {}: shape {:?}, type {}",
                        label, slot.index, slot.shape, slot.element_type
                    );
                }
            }
            registry.destroy(handle);
        }

        Commands::Run {
            model,
            input,
            format,
        } => {
            let handle = load(registry, &model)?;
            let result = run(registry, handle, &input, &format);
            registry.destroy(handle);
            result?;
        }

        Commands::Check { model, iterations } => {
            for i in 0..iterations {
                let handle = load(registry, &model)
                    .with_context(|| format!("Cycle {} of {}", i + 1, iterations))?;
                registry.destroy(handle);
            }
            ensure!(registry.is_empty(), "{} sessions leaked", registry.len());
            println!("Status: OK ({} create/destroy cycles)", iterations);
        }
    }

    Ok(())
}
