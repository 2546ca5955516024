use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

/// Atomically write bytes to a file by writing to a temp file then renaming.
///
/// Readers see either the old contents or the new contents, never a partial write.
///
/// # Errors
/// Returns an error if the write or rename fails.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));

    // Same directory keeps the rename on one filesystem
    let mut temp_path = parent.to_path_buf();
    temp_path.push(format!(
        ".{}.tmp.{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("file"),
        std::process::id()
    ));

    {
        let mut file = File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    match fs::rename(&temp_path, path) {
        Ok(()) => Ok(()),
        Err(e) => {
            // On Windows, rename can fail if target exists.
            if cfg!(windows) {
                fs::copy(&temp_path, path)?;
                let _ = fs::remove_file(&temp_path);
                Ok(())
            } else {
                let _ = fs::remove_file(&temp_path);
                Err(e)
            }
        }
    }
}

/// Prepend `line` to the file at `path` unless the file already starts with it.
///
/// Returns the final contents. The rewrite goes through [`atomic_write`].
///
/// # Errors
/// Returns an error if the file cannot be read or rewritten.
pub fn ensure_first_line(path: &Path, line: &str) -> io::Result<Vec<u8>> {
    let content = fs::read(path)?;
    if content.starts_with(line.as_bytes()) {
        return Ok(content);
    }

    let mut updated = Vec::with_capacity(line.len() + 1 + content.len());
    updated.extend_from_slice(line.as_bytes());
    updated.push(b'\n');
    updated.extend_from_slice(&content);
    atomic_write(path, &updated)?;
    Ok(updated)
}

/// Remove a directory tree. A directory that is already absent is not an error.
///
/// Returns `true` if something was removed.
///
/// # Errors
/// Returns any error other than `NotFound`.
pub fn remove_dir_all_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
