use std::path::Path;
use std::time::UNIX_EPOCH;

/// `size:mtime_ns` of a file; any change to either invalidates cached work.
pub fn file_signature(path: &Path) -> std::io::Result<String> {
    let meta = std::fs::metadata(path)?;
    let mtime_ns = meta
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    Ok(format!("{}:{}", meta.len(), mtime_ns))
}

/// Signature of a waveform request: file signature plus the bin count.
pub fn waveform_signature(path: &Path, points: usize) -> std::io::Result<String> {
    Ok(format!("{}|p{points}", file_signature(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_tracks_size_and_points() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("a.bin");
        std::fs::write(&path, b"abc").expect("write");
        let sig = file_signature(&path).expect("sig");
        assert!(sig.starts_with("3:"));
        let wave = waveform_signature(&path, 4200).expect("wave sig");
        assert_eq!(wave, format!("{sig}|p4200"));
        std::fs::write(&path, b"abcd").expect("rewrite");
        assert_ne!(file_signature(&path).expect("sig"), sig);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(file_signature(Path::new("/definitely/not/here.wav")).is_err());
    }
}
