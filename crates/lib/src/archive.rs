//! Tar packaging for the `copy` verb.

use std::fs::File;
use std::path::Path;

use luabox_core::Result;

/// Package `source` into a tar stream whose single entry lands at `target`.
///
/// Directories are not supported yet: an advisory is printed and an empty
/// stream is returned, which results in an empty copy. Stat and open errors
/// surface to the caller.
pub fn package(source: &Path, target: &str) -> Result<Vec<u8>> {
    let metadata = std::fs::metadata(source)?;
    if metadata.is_dir() {
        println!("Cannot copy directory yet");
        return Ok(Vec::new());
    }

    // Tar entry names are relative; the upload destination carries the root.
    let name = target.trim_start_matches('/');

    let mut builder = tar::Builder::new(Vec::new());
    let mut file = File::open(source)?;
    builder.append_file(name, &mut file)?;
    Ok(builder.into_inner()?)
}
