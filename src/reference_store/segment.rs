/// Segment files: naming, listing, reading and writing
use crate::{
    atomic_file::{encode_pretty, write_bytes_atomic},
    error::{GatewayError, GatewayResult},
    reference_store::Reference,
};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;

const SEGMENT_PREFIX: &str = "ref_";
const SEGMENT_SUFFIX: &str = ".json";

/// A segment file and the references it holds (or will hold, if not yet written)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub path: PathBuf,
    pub sequence: u32,
    pub references: Vec<Reference>,
}

/// An existing segment file as seen in a directory listing
#[derive(Debug, Clone)]
pub struct SegmentFile {
    pub path: PathBuf,
    pub sequence: u32,
    pub modified: SystemTime,
}

/// `ref_001.json`, `ref_002.json`, ...
pub fn segment_file_name(sequence: u32) -> String {
    format!("{}{:03}{}", SEGMENT_PREFIX, sequence, SEGMENT_SUFFIX)
}

/// Parse the sequence number out of a segment file name
pub fn parse_sequence(file_name: &str) -> Option<u32> {
    let digits = file_name
        .strip_prefix(SEGMENT_PREFIX)?
        .strip_suffix(SEGMENT_SUFFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// List the segment files of a references directory, ordered by sequence
///
/// Fails with `StoreUnavailable` when the directory itself is missing, which
/// means the tenant was never provisioned.
pub async fn list_segments(dir: &Path) -> GatewayResult<Vec<SegmentFile>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(GatewayError::StoreUnavailable(format!(
                "references directory not found: {}",
                dir.display()
            )));
        }
        Err(e) => return Err(GatewayError::Read(format!("{}: {}", dir.display(), e))),
    };

    let mut segments = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| GatewayError::Read(format!("{}: {}", dir.display(), e)))?
    {
        let name = entry.file_name();
        let Some(sequence) = parse_sequence(&name.to_string_lossy()) else {
            continue;
        };

        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            // Renamed away between listing and stat
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => {
                return Err(GatewayError::Read(format!(
                    "{}: {}",
                    entry.path().display(),
                    e
                )))
            }
        };
        if !metadata.is_file() {
            continue;
        }

        segments.push(SegmentFile {
            path: entry.path(),
            sequence,
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        });
    }

    segments.sort_by_key(|s| s.sequence);
    Ok(segments)
}

/// The segment with the most recent modification time (ties go to the higher sequence)
pub fn most_recent(segments: &[SegmentFile]) -> Option<&SegmentFile> {
    segments.iter().max_by_key(|s| (s.modified, s.sequence))
}

/// Next free sequence number: `count + 1`, skipping numbers already taken
pub fn next_sequence(segments: &[SegmentFile]) -> u32 {
    let mut next = segments.len() as u32 + 1;
    while segments.iter().any(|s| s.sequence == next) {
        next += 1;
    }
    next
}

/// Read a segment's references; a missing file is an empty segment
pub async fn read_references(path: &Path) -> GatewayResult<Vec<Reference>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(GatewayError::Read(format!("{}: {}", path.display(), e))),
    };

    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(Vec::new());
    }

    serde_json::from_slice(&bytes)
        .map_err(|e| GatewayError::Decode(format!("{}: {}", path.display(), e)))
}

/// Serialize a reference array the way it is stored on disk
pub fn encode_references(references: &[Reference]) -> GatewayResult<Vec<u8>> {
    encode_pretty(references)
}

/// Replace a segment file with the given array
pub async fn write_segment(segment: &Segment) -> GatewayResult<()> {
    let bytes = encode_references(&segment.references)?;
    write_bytes_atomic(&segment.path, &bytes).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::tempdir;

    fn reference(n: u8, path: &str) -> Reference {
        Reference {
            hash: format!("{:02x}", n).repeat(32),
            path: path.to_string(),
        }
    }

    #[test]
    fn test_segment_names() {
        assert_eq!(segment_file_name(1), "ref_001.json");
        assert_eq!(segment_file_name(42), "ref_042.json");
        assert_eq!(segment_file_name(1000), "ref_1000.json");
        assert_eq!(parse_sequence("ref_007.json"), Some(7));
        assert_eq!(parse_sequence("ref_1000.json"), Some(1000));
        assert_eq!(parse_sequence("ref_.json"), None);
        assert_eq!(parse_sequence("ref_001.json.tmp"), None);
        assert_eq!(parse_sequence(".ref_001.json.1234.tmp"), None);
        assert_eq!(parse_sequence("replace.intent.json"), None);
    }

    #[tokio::test]
    async fn test_list_segments_missing_dir_is_unavailable() {
        let dir = tempdir().unwrap();
        let result = list_segments(&dir.path().join("references")).await;
        assert!(matches!(result, Err(GatewayError::StoreUnavailable(_))));
    }

    #[tokio::test]
    async fn test_list_segments_ignores_other_files() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("ref_002.json"), b"[]").unwrap();
        std::fs::write(dir.path().join("ref_001.json"), b"[]").unwrap();
        std::fs::write(dir.path().join(".lock"), b"").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"").unwrap();

        let segments = list_segments(dir.path()).await.unwrap();
        let sequences: Vec<u32> = segments.iter().map(|s| s.sequence).collect();
        assert_eq!(sequences, vec![1, 2]);
    }

    #[test]
    fn test_next_sequence_skips_taken_numbers() {
        let file = |sequence| SegmentFile {
            path: PathBuf::from(segment_file_name(sequence)),
            sequence,
            modified: SystemTime::UNIX_EPOCH,
        };
        assert_eq!(next_sequence(&[]), 1);
        assert_eq!(next_sequence(&[file(1), file(2)]), 3);
        // ref_002 was deleted by hand: count + 1 == 2 is free again
        assert_eq!(next_sequence(&[file(1), file(3)]), 2);
        assert_eq!(next_sequence(&[file(2), file(3)]), 4);
    }

    #[tokio::test]
    async fn test_segment_round_trip_preserves_pairs() {
        let dir = tempdir().unwrap();
        let references = vec![
            reference(1, "img/a.png"),
            reference(2, "docs/b.pdf"),
            reference(3, "video/c d.mp4"),
        ];
        let segment = Segment {
            path: dir.path().join(segment_file_name(1)),
            sequence: 1,
            references: references.clone(),
        };

        write_segment(&segment).await.unwrap();
        let loaded = read_references(&segment.path).await.unwrap();

        let expected: HashSet<Reference> = references.into_iter().collect();
        let actual: HashSet<Reference> = loaded.into_iter().collect();
        assert_eq!(expected, actual);
    }

    #[tokio::test]
    async fn test_read_missing_or_blank_segment_is_empty() {
        let dir = tempdir().unwrap();
        assert!(read_references(&dir.path().join("ref_001.json")).await.unwrap().is_empty());

        std::fs::write(dir.path().join("ref_002.json"), b"  \n").unwrap();
        assert!(read_references(&dir.path().join("ref_002.json")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_malformed_segment_is_decode_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ref_001.json");
        std::fs::write(&path, b"[{\"hash\": 1}").unwrap();
        assert!(matches!(
            read_references(&path).await,
            Err(GatewayError::Decode(_))
        ));
    }
}
