use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use walkdir::WalkDir;

/// Fingerprint every regular file below `dir`.
///
/// Files are visited in sorted path order and both the relative path and the
/// content feed the hasher, so renames change the fingerprint as well.
///
/// # Errors
/// Returns an error if the directory cannot be walked or a file cannot be read.
pub fn blake3_dir(dir: &Path) -> io::Result<String> {
    let mut hasher = blake3::Hasher::new();
    let mut buffer = [0u8; 8192];

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(io::Error::other)?;
        if !entry.file_type().is_file() {
            continue;
        }

        let rel = entry.path().strip_prefix(dir).unwrap_or(entry.path());
        hasher.update(rel.to_string_lossy().as_bytes());
        hasher.update(&[0]);

        let mut reader = BufReader::new(File::open(entry.path())?);
        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }
    }

    Ok(hasher.finalize().to_hex().to_string())
}
