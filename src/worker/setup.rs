// src/worker/setup.rs

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::worker::descriptor::StepDescriptor;

/// Materialize the driver and every input into the step's working directory.
pub fn run_setup(desc: &StepDescriptor) -> Result<()> {
    info!(component = %desc.component, workdir = ?desc.workdir, "setting up step");

    fs::create_dir_all(&desc.workdir)
        .with_context(|| format!("creating working directory {:?}", desc.workdir))?;

    copy_file(&desc.driver_source, &desc.driver)?;
    make_executable(&desc.driver)?;

    for input in desc.inputs.iter() {
        copy_file(&input.source, &input.dest)
            .with_context(|| format!("staging input '{}'", input.name))?;
        debug!(input = %input.name, dest = ?input.dest, "input staged");
    }

    for output in desc.outputs.iter() {
        if let Some(parent) = output.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating output directory {:?}", parent))?;
        }
    }

    Ok(())
}

fn copy_file(source: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {:?}", parent))?;
    }
    fs::copy(source, dest).with_context(|| format!("copying {:?} to {:?}", source, dest))?;
    Ok(())
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)
        .with_context(|| format!("reading permissions of {:?}", path))?
        .permissions();
    perms.set_mode(perms.mode() | 0o755);
    fs::set_permissions(path, perms).with_context(|| format!("chmod {:?}", path))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}
