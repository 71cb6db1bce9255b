// Session storage - artifact naming, telemetry file I/O, directory scan

use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDateTime};

use super::{SessionSummary, StorageError, TelemetryDocument};

/// Session id format; also the file stem of both artifacts
pub const SESSION_ID_FORMAT: &str = "%Y-%m-%d-%H-%M-%S-%3f";

/// Telemetry file extension
pub const TELEMETRY_EXTENSION: &str = "json";

/// Derive a session id from a start time
pub fn session_id_for(start: DateTime<Local>) -> String {
    start.format(SESSION_ID_FORMAT).to_string()
}

/// Session id for a start time that no existing artifact in `storage` and
/// no `previous` session uses. Collisions get a `-1`, `-2`, ... suffix.
pub fn unique_session_id(
    storage: &Path,
    start: DateTime<Local>,
    video_extension: &str,
    previous: Option<&str>,
) -> String {
    let taken = |id: &str| {
        if previous == Some(id) {
            return true;
        }
        let (video, telemetry) = artifact_paths(storage, id, video_extension);
        video.exists() || telemetry.exists()
    };

    let base = session_id_for(start);
    let mut id = base.clone();
    let mut n = 0u32;
    while taken(id.as_str()) {
        n += 1;
        id = format!("{}-{}", base, n);
    }
    if n > 0 {
        log::debug!("Session id {} already used, recording as {}", base, id);
    }
    id
}

/// Parse the start time back out of a session id, ignoring a collision suffix
pub fn parse_session_timestamp(id: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(id, SESSION_ID_FORMAT)
        .ok()
        .or_else(|| {
            let (base, suffix) = id.rsplit_once('-')?;
            if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            NaiveDateTime::parse_from_str(base, SESSION_ID_FORMAT).ok()
        })
}

/// Paths of the two artifacts for a session
pub fn artifact_paths(storage: &Path, id: &str, video_extension: &str) -> (PathBuf, PathBuf) {
    (
        storage.join(format!("{}.{}", id, video_extension)),
        storage.join(format!("{}.{}", id, TELEMETRY_EXTENSION)),
    )
}

/// Write a telemetry file atomically.
///
/// The document is written to a temporary file in the same directory and
/// renamed into place, so a reader never sees a half-written file.
/// Returns the size of the written file.
pub fn write_telemetry(
    path: &Path,
    document: &TelemetryDocument,
    pretty: bool,
) -> Result<u64, StorageError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        if pretty {
            serde_json::to_writer_pretty(&mut writer, document)?;
        } else {
            serde_json::to_writer(&mut writer, document)?;
        }
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StorageError::Io(e.error))?;

    let bytes = std::fs::metadata(path)?.len();
    log::debug!("Wrote telemetry {:?} ({} bytes)", path, bytes);
    Ok(bytes)
}

/// Read and parse a telemetry file
pub fn read_telemetry(path: &Path) -> Result<TelemetryDocument, StorageError> {
    if !path.exists() {
        return Err(StorageError::NotFound(path.to_path_buf()));
    }
    let file = std::fs::File::open(path)?;
    let document = serde_json::from_reader(BufReader::new(file))?;
    Ok(document)
}

/// List sessions in a storage directory, oldest first.
///
/// A session is any telemetry file; its video is reported if a file with
/// the same stem and `video_extension` sits next to it.
pub fn list_sessions(storage: &Path, video_extension: &str) -> Result<Vec<SessionSummary>, StorageError> {
    if !storage.is_dir() {
        return Err(StorageError::NotFound(storage.to_path_buf()));
    }

    let mut sessions = Vec::new();
    for entry in std::fs::read_dir(storage)?.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(TELEMETRY_EXTENSION) {
            continue;
        }
        let Some(id) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
            continue;
        };

        let video_path = path.with_extension(video_extension);
        sessions.push(SessionSummary {
            recorded_at: parse_session_timestamp(&id),
            video_path: video_path.exists().then_some(video_path),
            telemetry_path: path,
            id,
        });
    }

    // Ids sort chronologically; foreign names sort after by name
    sessions.sort_by(|a, b| match (a.recorded_at, b.recorded_at) {
        (Some(x), Some(y)) => x
            .cmp(&y)
            .then_with(|| a.id.len().cmp(&b.id.len()))
            .then_with(|| a.id.cmp(&b.id)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.id.cmp(&b.id),
    });
    Ok(sessions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn sample_doc() -> TelemetryDocument {
        TelemetryDocument {
            blend_shape_keys: vec!["jawOpen".into()],
            blend_shape_values: vec![vec![0.5], vec![]],
            vertices: vec![vec![], vec![]],
            texture_coordinates: vec![vec![], vec![]],
            triangle_indices: vec![vec![], vec![]],
        }
    }

    #[test]
    fn session_id_round_trips_to_timestamp() {
        let start = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let id = session_id_for(start);
        assert_eq!(id, "2024-03-09-14-05-07-000");
        assert_eq!(parse_session_timestamp(&id), Some(start.naive_local()));
        assert_eq!(parse_session_timestamp("holiday"), None);
    }

    #[test]
    fn colliding_ids_get_a_suffix() {
        let dir = tempdir().unwrap();
        let start = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let base = session_id_for(start);

        assert_eq!(unique_session_id(dir.path(), start, "mp4", None), base);
        assert_eq!(
            unique_session_id(dir.path(), start, "mp4", Some(base.as_str())),
            format!("{}-1", base)
        );

        std::fs::write(dir.path().join(format!("{}.json", base)), b"{}").unwrap();
        std::fs::write(dir.path().join(format!("{}-1.mp4", base)), b"").unwrap();
        let id = unique_session_id(dir.path(), start, "mp4", None);
        assert_eq!(id, format!("{}-2", base));
        assert_eq!(parse_session_timestamp(&id), Some(start.naive_local()));
        assert_eq!(parse_session_timestamp(&format!("{}-x", base)), None);
    }

    #[test]
    fn artifact_paths_share_stem() {
        let (video, telemetry) = artifact_paths(Path::new("/data"), "abc", "mp4");
        assert_eq!(video, PathBuf::from("/data/abc.mp4"));
        assert_eq!(telemetry, PathBuf::from("/data/abc.json"));
    }

    #[test]
    fn write_then_read_telemetry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("s.json");

        let bytes = write_telemetry(&path, &sample_doc(), false).unwrap();
        assert!(bytes > 0);
        assert_eq!(read_telemetry(&path).unwrap(), sample_doc());

        // No temp files left behind
        let leftovers = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn read_missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let err = read_telemetry(&dir.path().join("none.json")).unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[test]
    fn list_sessions_pairs_video_and_sorts() {
        let dir = tempdir().unwrap();
        let older = "2024-01-01-10-00-00-000";
        let newer = "2024-01-02-10-00-00-000";
        write_telemetry(&dir.path().join(format!("{}.json", newer)), &sample_doc(), false).unwrap();
        write_telemetry(&dir.path().join(format!("{}.json", older)), &sample_doc(), false).unwrap();
        std::fs::write(dir.path().join(format!("{}.mp4", older)), b"").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();
        let older_again = format!("{}-1", older);
        write_telemetry(&dir.path().join(format!("{}.json", older_again)), &sample_doc(), false).unwrap();

        let sessions = list_sessions(dir.path(), "mp4").unwrap();
        assert_eq!(sessions.len(), 3);
        assert_eq!(sessions[0].id, older);
        assert!(sessions[0].video_path.is_some());
        assert_eq!(sessions[1].id, older_again);
        assert_eq!(sessions[2].id, newer);
        assert!(sessions[2].video_path.is_none());
    }
}
