use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{RtError, RtResult};

/// Proof that the working file was reset to the fixture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreReceipt {
    pub fixture: PathBuf,
    pub working_file: PathBuf,
    pub bytes: u64,
    pub sha256: String,
}

/// Copy `fixture` over `working_file` and confirm the two are identical.
///
/// The fixture is only ever read. A working file that resolves to the
/// fixture itself is rejected before anything is written. A digest mismatch
/// after the copy is reported as [`RtError::FixtureMismatch`].
pub fn restore(fixture: &Path, working_file: &Path) -> RtResult<RestoreReceipt> {
    if !fixture.is_file() {
        return Err(RtError::precondition("fixture file", fixture));
    }
    if same_file(fixture, working_file) {
        return Err(RtError::InvalidConfig(format!(
            "working file `{}` is the fixture `{}`",
            working_file.display(),
            fixture.display()
        )));
    }
    let failed = |source: std::io::Error| RtError::RestoreFailed {
        path: working_file.to_path_buf(),
        source,
    };
    let expected = digest(fixture).map_err(failed)?;

    if let Some(parent) = working_file.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(failed)?;
    }
    let bytes = std::fs::copy(fixture, working_file).map_err(failed)?;

    let actual = digest(working_file).map_err(failed)?;
    if actual != expected {
        return Err(RtError::FixtureMismatch {
            path: working_file.to_path_buf(),
            expected,
            actual,
        });
    }

    tracing::info!(
        fixture = %fixture.display(),
        working_file = %working_file.display(),
        bytes,
        sha256 = %actual,
        "working file restored from fixture"
    );

    Ok(RestoreReceipt {
        fixture: fixture.to_path_buf(),
        working_file: working_file.to_path_buf(),
        bytes,
        sha256: actual,
    })
}

/// Whether both paths name the same file, through symlinks, `..` segments
/// or hard links. A path that does not exist aliases nothing.
fn same_file(a: &Path, b: &Path) -> bool {
    let (Ok(meta_a), Ok(meta_b)) = (std::fs::metadata(a), std::fs::metadata(b)) else {
        return false;
    };
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        meta_a.dev() == meta_b.dev() && meta_a.ino() == meta_b.ino()
    }
    #[cfg(not(unix))]
    {
        let _ = (meta_a, meta_b);
        matches!(
            (std::fs::canonicalize(a), std::fs::canonicalize(b)),
            (Ok(ca), Ok(cb)) if ca == cb
        )
    }
}

/// Hex SHA-256 of a file's contents.
fn digest(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
