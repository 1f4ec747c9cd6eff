//! Shared helpers for pipefleet's integration tests.

pub mod builders;
pub mod scripted_scheduler;

use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Once;
use std::time::Duration;

use pipefleet::logging::LOG_ENV_VAR;
use tracing_subscriber::{EnvFilter, fmt};

static INIT: Once = Once::new();

/// Generous enough for the local scheduler's real subprocesses.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Install a test-captured subscriber once per test binary.
///
/// The filter comes from `PIPEFLEET_LOG` (e.g.
/// `PIPEFLEET_LOG=pipefleet::foreman=debug cargo test`), defaulting to `info`.
/// Output only shows for failing tests unless run with `--nocapture`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
            .unwrap_or_else(|_| EnvFilter::new("info"));
        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Await `f`, panicking after [`TEST_TIMEOUT`].
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(TEST_TIMEOUT, f).await {
        Ok(v) => v,
        Err(_) => panic!("test timed out after {TEST_TIMEOUT:?}"),
    }
}

/// Write `body` to `dir/name` and return the path.
pub fn write_file(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, body).unwrap();
    path
}

/// A `#!/bin/sh` script with mode 755.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = write_file(dir, name, &format!("#!/bin/sh\n{body}\n"));
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path
}
