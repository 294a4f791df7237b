pub mod ledger;
pub mod slots;

pub use ledger::*;
pub use slots::*;

use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

/// Write a file atomically: write the full contents to a uniquely named
/// temporary sibling, then rename into place. Readers either see the
/// previous version or the new one, never a torn file, and concurrent
/// writers of the same path never share a temporary. The last rename wins.
pub(crate) fn atomic_write(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
