//! Archive download of a finished output folder.

use std::io::{Read, Write};
use std::path::{Component, Path as FsPath, PathBuf};

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue};
use serde::Deserialize;
use tracing::info;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use tunefetch_models::MediaKind;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ArchiveQuery {
    #[serde(default)]
    pub q: Option<String>,
}

/// `GET /downloads/:kind?q=<folder>`: zip every `.mp3` in the folder.
pub async fn download_archive(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(query): Query<ArchiveQuery>,
) -> ApiResult<(HeaderMap, Vec<u8>)> {
    let kind = MediaKind::ALL
        .into_iter()
        .find(|k| k.as_str() == kind)
        .ok_or_else(|| ApiError::bad_request(format!("Unknown download kind: {}", kind)))?;
    let folder_name = query.q.unwrap_or_default();
    let folder = resolve_folder(&state.config.output_root, kind, &folder_name)?;

    let zip_bytes = tokio::task::spawn_blocking(move || {
        let files = list_mp3_files(&folder)?;
        if files.is_empty() {
            return Err(ApiError::not_found("No MP3 files in folder"));
        }
        build_archive_zip(&files)
    })
    .await
    .map_err(|e| ApiError::internal(format!("Failed to join archive task: {e}")))??;

    let filename = archive_filename(&folder_name);
    info!(kind = kind.as_str(), folder = %folder_name, bytes = zip_bytes.len(), "Serving archive");

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/zip"));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!("attachment; filename=\"{filename}\""))
            .map_err(|e| ApiError::internal(format!("Invalid header value: {e}")))?,
    );

    Ok((headers, zip_bytes))
}

/// Map a folder name to `<root>/<kind>/<name>`, refusing anything that is not
/// a single plain path component.
fn resolve_folder(root: &FsPath, kind: MediaKind, name: &str) -> ApiResult<PathBuf> {
    if name.trim().is_empty() {
        return Err(ApiError::bad_request("q is required"));
    }

    let mut components = FsPath::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !name.contains(['/', '\\']) => {
            Ok(root.join(kind.folder_name()).join(name))
        }
        _ => Err(ApiError::bad_request("Invalid folder name")),
    }
}

fn list_mp3_files(folder: &FsPath) -> ApiResult<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(folder) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::not_found("Folder not found"));
        }
        Err(e) => return Err(ApiError::internal(format!("Failed to read folder: {e}"))),
    };

    let mut files = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| ApiError::internal(format!("Failed to read folder entry: {e}")))?
            .path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "mp3") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn build_archive_zip(files: &[PathBuf]) -> ApiResult<Vec<u8>> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    let mut zip = ZipWriter::new(&mut cursor);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for path in files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        zip.start_file(name, options)
            .map_err(|e| ApiError::internal(format!("Failed to add zip entry: {e}")))?;

        let mut file = std::fs::File::open(path)
            .map_err(|e| ApiError::internal(format!("Failed to open file: {e}")))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)
            .map_err(|e| ApiError::internal(format!("Failed to read file: {e}")))?;
        zip.write_all(&buf)
            .map_err(|e| ApiError::internal(format!("Failed to write zip entry: {e}")))?;
    }

    zip.finish()
        .map_err(|e| ApiError::internal(format!("Failed to finish zip: {e}")))?;

    Ok(cursor.into_inner())
}

/// Header-safe attachment name: word characters, whitespace and `-` survive,
/// whitespace runs become `_`.
fn archive_filename(folder: &str) -> String {
    let kept: String = folder
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-' || c.is_whitespace())
        .collect();
    let joined = kept.split_whitespace().collect::<Vec<_>>().join("_");
    format!("{joined}.zip")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_filename() {
        assert_eq!(archive_filename("Greatest Hits (Deluxe)"), "Greatest_Hits_Deluxe.zip");
        assert_eq!(archive_filename("Song - Artist"), "Song_-_Artist.zip");
    }

    #[test]
    fn test_resolve_folder_rejects_traversal() {
        let root = FsPath::new("/srv/downloads");
        assert!(resolve_folder(root, MediaKind::Album, "..").is_err());
        assert!(resolve_folder(root, MediaKind::Album, "a/b").is_err());
        assert!(resolve_folder(root, MediaKind::Album, "a\\b").is_err());
        assert!(resolve_folder(root, MediaKind::Album, "  ").is_err());
        assert_eq!(
            resolve_folder(root, MediaKind::Album, "Greatest Hits").unwrap(),
            PathBuf::from("/srv/downloads/album/Greatest Hits")
        );
    }

    #[test]
    fn test_only_mp3_files_are_archived() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.mp3"), b"bb").unwrap();
        std::fs::write(dir.path().join("a.mp3"), b"a").unwrap();
        std::fs::write(dir.path().join("cover.jpg"), b"x").unwrap();

        let files = list_mp3_files(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("a.mp3"));

        let bytes = build_archive_zip(&files).unwrap();
        let archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 2);
    }
}
