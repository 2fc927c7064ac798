use crate::error::{Result, WorkerError};
use std::path::Path;

/// Validate a configured (or discovered) Chrome executable path before the
/// Chrome Supervisor spawns it.
pub fn validate_chrome_path(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(WorkerError::Validation(format!(
            "chrome executable not found at {:?}",
            path
        )));
    }

    if !path.is_file() {
        return Err(WorkerError::Validation(format!(
            "chrome path {:?} is not a file",
            path
        )));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let metadata = path
            .metadata()
            .map_err(|e| WorkerError::Validation(format!("cannot read chrome metadata: {e}")))?;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(WorkerError::Validation(format!(
                "chrome executable {:?} is not executable",
                path
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_path() {
        let err = validate_chrome_path(Path::new("/nonexistent/chrome")).unwrap_err();
        assert!(matches!(err, WorkerError::Validation(_)));
    }

    #[test]
    fn rejects_directory() {
        let dir = std::env::temp_dir();
        let err = validate_chrome_path(&dir).unwrap_err();
        assert!(matches!(err, WorkerError::Validation(_)));
    }
}
