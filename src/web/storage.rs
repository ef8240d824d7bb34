//! Local blob store for journal images.
//!
//! Names are generator-unique (upload millis plus a random token), so writes
//! never need to probe for collisions.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use axum::{
    extract::Path as AxumPath,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use mime::Mime;
use tracing::warn;
use uuid::Uuid;

pub const STORAGE_ROOT: &str = "storage/journal-images";
pub const PUBLIC_PREFIX: &str = "/media/journal-images";

pub fn default_root() -> &'static Path {
    Path::new(STORAGE_ROOT)
}

/// Ensure the image storage directory exists.
pub async fn ensure_storage_root(root: &Path) -> Result<()> {
    tokio::fs::create_dir_all(root)
        .await
        .with_context(|| format!("failed to ensure storage root at {}", root.display()))
}

pub fn is_supported_image(content_type: &str) -> bool {
    content_type
        .parse::<Mime>()
        .map(|mime| mime.type_() == mime::IMAGE)
        .unwrap_or(false)
}

/// Persist image bytes under a fresh unique name and return the stored name.
pub async fn save_image(root: &Path, original_name: &str, bytes: &[u8]) -> Result<String> {
    ensure_storage_root(root).await?;

    let stored_name = unique_image_name(original_name, Utc::now().timestamp_millis(), Uuid::new_v4());
    let path = root.join(&stored_name);
    tokio::fs::write(&path, bytes)
        .await
        .with_context(|| format!("failed to write image to {}", path.display()))?;

    Ok(stored_name)
}

pub fn public_url(stored_name: &str) -> String {
    format!("{PUBLIC_PREFIX}/{stored_name}")
}

pub async fn list_images(root: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let mut dir = match tokio::fs::read_dir(root).await {
        Ok(dir) => dir,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(names),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read image storage at {}", root.display()));
        }
    };

    while let Some(entry) = dir
        .next_entry()
        .await
        .context("failed to iterate image storage")?
    {
        let is_file = entry
            .file_type()
            .await
            .map(|kind| kind.is_file())
            .unwrap_or(false);
        if !is_file {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }

    Ok(names)
}

/// Remove every stored image. The first failure aborts and is reported.
pub async fn remove_all_images(root: &Path) -> Result<u64> {
    let mut removed = 0_u64;
    for name in list_images(root).await? {
        let path = root.join(&name);
        tokio::fs::remove_file(&path)
            .await
            .with_context(|| format!("failed to remove stored image {}", path.display()))?;
        removed += 1;
    }
    Ok(removed)
}

/// GET handler streaming a stored image back to the client.
pub async fn serve_image(AxumPath(name): AxumPath<String>) -> Result<Response, StatusCode> {
    if name.contains('/') || name.contains("..") {
        return Err(StatusCode::NOT_FOUND);
    }

    let path = PathBuf::from(STORAGE_ROOT).join(&name);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Err(StatusCode::NOT_FOUND),
        Err(err) => {
            warn!(?err, image = %name, "failed to read stored image");
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(content_type_for(&name)),
    );
    Ok((headers, bytes).into_response())
}

fn unique_image_name(original_name: &str, timestamp_millis: i64, token: Uuid) -> String {
    let path = Path::new(original_name);

    let mut stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .map(sanitize_filename::sanitize)
        .unwrap_or_default();
    if stem.is_empty() {
        stem = "entry".to_string();
    }

    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .unwrap_or_else(|| "png".to_string());

    format!("{}_{}_{}.{}", stem, timestamp_millis, token.simple(), extension)
}

fn content_type_for(name: &str) -> &'static str {
    let extension = Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn image_names_are_unique_per_token() {
        let token_a = Uuid::new_v4();
        let token_b = Uuid::new_v4();
        let first = unique_image_name("selfie.PNG", 1700000000000, token_a);
        let second = unique_image_name("selfie.PNG", 1700000000000, token_b);

        assert_ne!(first, second);
        assert!(first.starts_with("selfie_1700000000000_"));
        assert!(first.ends_with(".png"));
    }

    #[test]
    fn image_names_survive_hostile_input() {
        let name = unique_image_name("../../etc/passwd", 42, Uuid::new_v4());
        assert!(!name.contains(".."));
        assert!(!name.contains('/'));

        let empty = unique_image_name("", 42, Uuid::new_v4());
        assert!(empty.starts_with("entry_42_"));
        assert!(empty.ends_with(".png"));
    }

    #[test]
    fn content_types_follow_extension() {
        assert_eq!(content_type_for("a.png"), "image/png");
        assert_eq!(content_type_for("a.JPG"), "image/jpeg");
        assert_eq!(content_type_for("weird.bin"), "application/octet-stream");
    }

    #[test]
    fn supported_image_checks_mime_type() {
        assert!(is_supported_image("image/png"));
        assert!(is_supported_image("image/jpeg"));
        assert!(!is_supported_image("application/pdf"));
        assert!(!is_supported_image("not a mime"));
    }

    #[tokio::test]
    async fn save_list_and_remove_round_trip() {
        let dir = tempdir().expect("temp dir");
        let root = dir.path().join("images");

        let stored = save_image(&root, "note.png", b"pixels")
            .await
            .expect("save image");
        assert!(public_url(&stored).starts_with(PUBLIC_PREFIX));

        let listed = list_images(&root).await.expect("list images");
        assert_eq!(listed, vec![stored]);

        let removed = remove_all_images(&root).await.expect("remove images");
        assert_eq!(removed, 1);
        assert!(list_images(&root).await.expect("list again").is_empty());
    }

    #[tokio::test]
    async fn missing_root_lists_empty() {
        let dir = tempdir().expect("temp dir");
        let root = dir.path().join("never-created");
        assert!(list_images(&root).await.expect("list").is_empty());
        assert_eq!(remove_all_images(&root).await.expect("remove"), 0);
    }
}
