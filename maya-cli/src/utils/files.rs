use std::path::{Path, PathBuf};

use url::Url;

use crate::error::AppError;

const MAX_NAME_CHARS: usize = 30;

/// Creates all directories in the given path, including parent directories if they don't exist.
#[inline]
pub async fn create_dirs(path: &Path) -> Result<(), AppError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(AppError::Io)?;
    Ok(())
}

/// Extracts a filename from a URL, removing the file extension and truncating if too long.
///
/// ```text
/// https://cdn.example.com/vod/episode-01.m3u8?token=x  ->  episode-01
/// https://cdn.example.com/                             ->  stream
/// ```
pub fn extract_filename_from_url(url: &Url) -> String {
    let file_name = url
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).next_back())
        .unwrap_or("stream");

    let url_name = match file_name.rfind('.') {
        Some(0) | None => file_name,
        Some(pos) => &file_name[..pos],
    };

    // we dont want large filenames
    if url_name.chars().count() > MAX_NAME_CHARS {
        let head: String = url_name.chars().take(MAX_NAME_CHARS - 3).collect();
        format!("{head}...")
    } else {
        url_name.to_string()
    }
}

/// Name of the merged file: the explicit `--name`, or the playlist name with `.ts`
pub fn output_file_name(url: &Url, name: Option<&str>) -> Result<String, AppError> {
    match name {
        Some(name) => {
            let name = name.trim();
            if name.is_empty() || name.contains(['/', '\\']) {
                return Err(AppError::InvalidInput(format!(
                    "output name must be a plain file name, got '{name}'"
                )));
            }
            Ok(name.to_string())
        }
        None => Ok(format!("{}.ts", extract_filename_from_url(url))),
    }
}

/// Hidden per-job directory next to the output: `<dir>/.<stem>.parts`
pub fn temp_dir_for(output_path: &Path) -> PathBuf {
    let stem = output_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "stream".to_string());
    let parent = output_path.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!(".{stem}.parts"))
}
