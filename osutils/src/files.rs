use std::{
    fs::File,
    io,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use anyhow::{Context, Error};

use crate::hashing_reader::HashingReader;

/// Creates a file and all parent directories if they don't exist.
pub fn create_file<S>(path: S) -> Result<File, Error>
where
    S: AsRef<Path>,
{
    if let Some(parent) = path.as_ref().parent() {
        create_dirs(parent)?;
    }

    std::fs::File::create(path.as_ref()).context(format!(
        "Could not create file: {}",
        path.as_ref().display()
    ))
}

/// Creates a file and all parent directories if they don't exist, and sets the file mode.
pub fn create_file_mode<S>(path: S, mode: u32) -> Result<File, Error>
where
    S: AsRef<Path>,
{
    let file = create_file(path)?;
    file.metadata()?.permissions().set_mode(mode);
    Ok(file)
}

/// Creates all directories in a path if they don't exist.
pub fn create_dirs<S>(path: S) -> Result<(), Error>
where
    S: AsRef<Path>,
{
    std::fs::create_dir_all(path.as_ref()).context(format!(
        "Could not create path: {}",
        path.as_ref().display()
    ))
}

/// Reads the content of a file and trims it.
pub fn read_file_trim(file_path: &Path) -> Result<String, Error> {
    let content = std::fs::read_to_string(file_path)
        .context(format!("Could not read file contents: {:?}", file_path))?;
    Ok(content.trim().to_string())
}

/// Removes a directory tree if it exists, ignoring the case where it is already absent.
pub fn remove_dir_if_present<S>(path: S) -> Result<(), Error>
where
    S: AsRef<Path>,
{
    match std::fs::remove_dir_all(path.as_ref()) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).context(format!(
            "Could not remove directory: {}",
            path.as_ref().display()
        )),
    }
}

/// Copies `src` to `dst`, invoking `observer` with the destination path before the bytes are
/// written, and returns the SHA256 hash of the copied content. Used by callers that need to
/// report progress (or skip already-present content) before committing a file into place.
pub fn copy_with_observer<F>(src: &Path, dst: &Path, mut observer: F) -> Result<String, Error>
where
    F: FnMut(&Path),
{
    observer(dst);

    if let Some(parent) = dst.parent() {
        create_dirs(parent)?;
    }

    let source =
        File::open(src).context(format!("Could not open source file: {}", src.display()))?;
    let mut reader = HashingReader::new(source);
    let mut dest_file = File::create(dst)
        .context(format!("Could not create destination file: {}", dst.display()))?;

    io::copy(&mut reader, &mut dest_file).context(format!(
        "Could not copy {} to {}",
        src.display(),
        dst.display()
    ))?;

    Ok(reader.hash())
}

/// Returns the SHA256 hash of a file's content without keeping it in memory.
pub fn hash_file(path: &Path) -> Result<String, Error> {
    let source =
        File::open(path).context(format!("Could not open file: {}", path.display()))?;
    let mut reader = HashingReader::new(source);
    io::copy(&mut reader, &mut io::sink())
        .context(format!("Could not read file: {}", path.display()))?;
    Ok(reader.hash())
}

/// Creates a file with a random name in the specified location, creating all parent directories
/// if they don't exist.
pub fn create_random_file<S>(location: S) -> Result<(File, PathBuf), Error>
where
    S: AsRef<Path>,
{
    create_dirs(location.as_ref())?;
    tempfile::NamedTempFile::new_in(location)
        .context("Failed to create temporary file")?
        .keep()
        .context("Failed to persist file")
}
