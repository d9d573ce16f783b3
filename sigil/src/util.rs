// SPDX-License-Identifier: MIT OR Apache-2.0

//! Small shared helpers, chiefly the path-traversal guard for files derived
//! from configuration values.

use crate::error::{self, Result};
use snafu::{ensure, ResultExt};
use std::path::{Component, Path, PathBuf};

/// Joins `relative` onto `base`, refusing anything that could escape it.
///
/// The relative part comes from configuration (a validator name); it must
/// not be absolute and must not contain `..` components.
pub fn safe_join(base: &Path, relative: &str) -> Result<PathBuf> {
    let relative_path = Path::new(relative);
    let escapes = relative_path.components().any(|component| {
        !matches!(component, Component::Normal(_) | Component::CurDir)
    });
    ensure!(
        !escapes && !relative.is_empty(),
        error::PathTraversalSnafu {
            what: format!("{}", base.join(relative).display()),
        }
    );
    Ok(base.join(relative_path))
}

/// Writes a validator's self-signed certificate under `dir`, once, at
/// startup. Returns the cache path.
pub fn install_cert(dir: &Path, validator_name: &str, pem: &str) -> Result<PathBuf> {
    let path = safe_join(dir, &format!("{validator_name}.crt"))?;
    std::fs::create_dir_all(dir).context(error::FileWriteSnafu {
        path: dir.display().to_string(),
    })?;
    if !path.exists() {
        std::fs::write(&path, pem).context(error::FileWriteSnafu {
            path: path.display().to_string(),
        })?;
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_names_join() {
        let joined = safe_join(Path::new("/certs"), "dockerhub.crt").unwrap();
        assert_eq!(joined, PathBuf::from("/certs/dockerhub.crt"));
    }

    #[test]
    fn traversals_are_rejected() {
        for bad in ["../etc/passwd", "a/../../b", "/etc/passwd", ""] {
            assert!(matches!(
                safe_join(Path::new("/certs"), bad).unwrap_err(),
                crate::Error::PathTraversal { .. }
            ));
        }
    }

    #[test]
    fn install_cert_writes_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = install_cert(dir.path(), "dockerhub", "PEM ONE").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "PEM ONE");
        // A second install does not clobber the cached file.
        install_cert(dir.path(), "dockerhub", "PEM TWO").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "PEM ONE");
    }

    #[test]
    fn cert_name_cannot_escape_the_root() {
        let dir = tempfile::tempdir().unwrap();
        assert!(install_cert(dir.path(), "../evil", "PEM").is_err());
    }
}
