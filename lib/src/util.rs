use std::{fs, io, path::Path};

/// Converts a not found error to Ok(false)
pub fn path_exists(path: &Path) -> io::Result<bool> {
    match fs::metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if matches!(e.kind(), io::ErrorKind::NotFound) => Ok(false),
        Err(e) => Err(e),
    }
}

/// The different ways the registry spreadsheets spell "no value".
///
/// Comparison is case-insensitive, and the input should already be trimmed.
pub fn is_null_like(s: &str) -> bool {
    s.is_empty()
        || ["null", "na", "n/a", "nan", "none"]
            .iter()
            .any(|null| s.eq_ignore_ascii_case(null))
}

/// Print an underlined section heading.
pub fn header(header: &str) {
    println!("\n{}\n{}\n", header, "=".repeat(header.len()));
}

#[cfg(test)]
mod test {
    use super::{is_null_like, path_exists};
    use std::path::Path;

    #[test]
    fn null_like() {
        assert!(is_null_like(""));
        assert!(is_null_like("NaN"));
        assert!(is_null_like("None"));
        assert!(!is_null_like("0"));
        assert!(!is_null_like("Thyroid"));
    }

    #[test]
    fn missing_path() {
        assert!(!path_exists(Path::new("definitely/not/a/real/path.bin")).unwrap());
    }
}
