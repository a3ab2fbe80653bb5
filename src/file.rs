use std::fs::File;
use std::io::Write;
use std::path::Path;

use tracing::info;

use crate::error::PeerError;

/// Writes a verified piece verbatim, creating or truncating `path`.
pub fn write_piece(path: &Path, data: &[u8]) -> Result<(), PeerError> {
    let persistence = |source| PeerError::Persistence {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::create(path).map_err(persistence)?;
    file.write_all(data).map_err(persistence)?;
    file.sync_all().map_err(persistence)?;

    info!(path = %path.display(), bytes = data.len(), "piece written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("piece-0");
        std::fs::write(&path, vec![1u8; 64]).unwrap();

        write_piece(&path, b"abc").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"abc");
    }

    #[test]
    fn reports_unwritable_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("piece-0");
        assert!(matches!(
            write_piece(&path, b"abc"),
            Err(PeerError::Persistence { .. })
        ));
    }
}
