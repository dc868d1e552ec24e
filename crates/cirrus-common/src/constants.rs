//! System-wide constants and default paths.

use std::path::{Path, PathBuf};

/// Application name used in CLI output and state files.
pub const APP_NAME: &str = "cirrus";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "cirrus";

/// Default stack file looked up by the CLI.
pub const DEFAULT_STACK_FILE: &str = "cirrus.yaml";

/// Name of the project-local directory holding state files.
pub const STATE_DIR_NAME: &str = ".cirrus";

/// Extension of persisted stack state files.
pub const STATE_FILE_EXTENSION: &str = "state.json";

/// Region used when the stack configuration does not name one.
pub const DEFAULT_REGION: &str = "us-west-2";

/// Default number of resources the engine provisions concurrently.
pub const DEFAULT_PARALLELISM: usize = 16;

/// Upper bound on resource name length.
pub const MAX_RESOURCE_NAME_LEN: usize = 128;

/// Resource name reserved for `${config.key}` interpolation in stack files.
pub const CONFIG_NAMESPACE: &str = "config";

/// Returns the project-local state directory for a stack file.
///
/// State lives next to the stack definition, in `.cirrus/`.
pub fn project_dir(stack_path: &Path) -> PathBuf {
    stack_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
        .join(STATE_DIR_NAME)
}

/// Returns the state file path for a stack inside `state_dir`.
pub fn state_file(state_dir: &Path, stack: &str) -> PathBuf {
    state_dir.join(format!("{stack}.{STATE_FILE_EXTENSION}"))
}
