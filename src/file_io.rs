use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error("Error reading file '{}': {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("Error writing to file '{}': {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },
}

impl FileError {
    pub fn path(&self) -> &Path {
        match self {
            FileError::Read { path, .. } | FileError::Write { path, .. } => path,
        }
    }
}

/// Reads a whole UTF-8 document. Empty or whitespace-only content is rejected.
pub fn read_text_file(path: impl AsRef<Path>) -> Result<String, FileError> {
    let path = path.as_ref();
    let read_err = |source| FileError::Read {
        path: path.to_path_buf(),
        source,
    };

    // read_to_string reports invalid UTF-8 as io::ErrorKind::InvalidData.
    let text = fs::read_to_string(path).map_err(read_err)?;
    if text.trim().is_empty() {
        return Err(read_err(io::Error::new(
            io::ErrorKind::InvalidData,
            "File is empty",
        )));
    }
    log::debug!("Read {} bytes from {}", text.len(), path.display());
    Ok(text)
}

pub fn write_text_file(path: impl AsRef<Path>, text: &str) -> Result<(), FileError> {
    let path = path.as_ref();
    fs::write(path, text).map_err(|source| FileError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    log::debug!("Wrote {} bytes to {}", text.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};

    fn temp_with(contents: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents).unwrap();
        file
    }

    #[test]
    fn test_read_returns_full_text() {
        let file = temp_with("The quick brown fox.\nSecond line.\n".as_bytes());
        let text = read_text_file(file.path()).unwrap();
        assert_eq!(text, "The quick brown fox.\nSecond line.\n");
    }

    #[test]
    fn test_read_empty_file_mentions_path() {
        let file = temp_with(b"");
        let err = read_text_file(file.path()).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("File is empty"), "unexpected message: {}", message);
        assert!(message.contains(&file.path().display().to_string()));
        assert!(matches!(err, FileError::Read { .. }));
    }

    #[test]
    fn test_read_missing_file() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope.txt");
        let err = read_text_file(&missing).unwrap_err();
        assert_eq!(err.path(), missing.as_path());
        match err {
            FileError::Read { source, .. } => assert_eq!(source.kind(), io::ErrorKind::NotFound),
            other => panic!("expected read error, got {:?}", other),
        }
    }

    #[test]
    fn test_read_rejects_invalid_utf8() {
        let file = temp_with(&[0x66, 0x6f, 0xff, 0xfe, 0x6f]);
        let err = read_text_file(file.path()).unwrap_err();
        assert!(err.to_string().starts_with("Error reading file"));
    }

    #[test]
    fn test_write_then_read_back() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("summary.txt");
        write_text_file(&out, "A short summary.").unwrap();
        assert_eq!(fs::read_to_string(&out).unwrap(), "A short summary.");

        // Existing files are truncated.
        write_text_file(&out, "Shorter.").unwrap();
        assert_eq!(fs::read_to_string(&out).unwrap(), "Shorter.");
    }

    #[test]
    fn test_write_into_missing_directory_fails() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("missing").join("summary.txt");
        let err = write_text_file(&out, "text").unwrap_err();
        assert!(matches!(err, FileError::Write { .. }));
        assert!(err.to_string().contains("Error writing to file"));
        assert!(!out.exists());
    }

    proptest! {
        #[test]
        fn prop_whitespace_only_is_rejected(ws in "[ \t\r\n]{0,32}") {
            let file = temp_with(ws.as_bytes());
            prop_assert!(read_text_file(file.path()).is_err());
        }

        #[test]
        fn prop_text_with_content_is_returned_verbatim(
            lead in "[ \n]{0,4}",
            body in "[a-zA-Z0-9.,]{1,40}",
            tail in "[ \n]{0,4}",
        ) {
            let text = format!("{}{}{}", lead, body, tail);
            let file = temp_with(text.as_bytes());
            prop_assert_eq!(read_text_file(file.path()).unwrap(), text);
        }
    }
}
