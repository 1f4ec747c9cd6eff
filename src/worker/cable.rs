// src/worker/cable.rs

use std::fs;

use anyhow::{Context, Result, bail};
use csv::{ReaderBuilder, Terminator, WriterBuilder};
use tracing::info;

use crate::archive::checksum_file;
use crate::pipeline::Wire;
use crate::worker::descriptor::{CableDescriptor, OutputReport, TaskReport, write_toml};

const DELIMITER: u8 = b',';

/// Copy or column-remap the cable's source into its destination and report
/// the result's checksum.
pub fn run_cable(desc: &CableDescriptor) -> Result<TaskReport> {
    if let Some(parent) = desc.dest.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {:?}", parent))?;
    }

    if desc.wires.is_empty() {
        fs::copy(&desc.source, &desc.dest)
            .with_context(|| format!("copying {:?} to {:?}", desc.source, desc.dest))?;
    } else {
        remap_columns(desc)?;
    }

    let checksum = checksum_file(&desc.dest)?;
    let report = TaskReport {
        outputs: vec![OutputReport {
            name: desc.component.clone(),
            path: desc.dest.clone(),
            passed: true,
            checksum: Some(checksum),
            reason: None,
        }],
    };
    write_toml(&desc.report, &report)?;
    info!(component = %desc.component, dest = ?desc.dest, "cable finished");
    Ok(report)
}

fn remap_columns(desc: &CableDescriptor) -> Result<()> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .delimiter(DELIMITER)
        .flexible(true)
        .from_path(&desc.source)
        .with_context(|| format!("opening cable source {:?}", desc.source))?;
    let mut writer = WriterBuilder::new()
        .delimiter(DELIMITER)
        .terminator(Terminator::Any(b'\n'))
        .from_path(&desc.dest)
        .with_context(|| format!("creating cable output {:?}", desc.dest))?;

    for (lineno, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("reading {:?}", desc.source))?;
        let fields: Vec<&str> = record.iter().collect();
        let row = remap_row(&fields, &desc.wires)
            .with_context(|| format!("{:?} row {}", desc.source, lineno + 1))?;
        writer
            .write_record(&row)
            .with_context(|| format!("writing {:?}", desc.dest))?;
    }

    writer.flush()?;
    Ok(())
}

/// `dest[w.dest_column] = source[w.source_column]` for every wire.
pub fn remap_row<'a>(fields: &[&'a str], wires: &[Wire]) -> Result<Vec<&'a str>> {
    let mut row = vec![""; wires.len()];
    for w in wires {
        let Some(value) = fields.get(w.source_column) else {
            bail!(
                "source column {} out of range ({} columns)",
                w.source_column,
                fields.len()
            );
        };
        let Some(slot) = row.get_mut(w.dest_column) else {
            bail!("destination column {} out of range", w.dest_column);
        };
        *slot = *value;
    }
    Ok(row)
}
