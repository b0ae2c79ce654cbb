use std::path::{Path, PathBuf};

use sqlx::SqlitePool;
use url::Url;

use crate::models::{Photo, PhotoType};

const PUBLIC_PREFIX: &str = "/uploads/photos/";

/// Where uploaded photo files live and how they are addressed.
#[derive(Debug, Clone)]
pub struct PhotoStorage {
    root: PathBuf,
    public_base: Option<Url>,
}

impl PhotoStorage {
    pub fn new(uploads_dir: impl Into<PathBuf>, public_base: Option<Url>) -> Self {
        Self {
            root: uploads_dir.into(),
            public_base,
        }
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.root
    }

    fn photos_dir(&self) -> PathBuf {
        self.root.join("photos")
    }

    /// Writes the file under a fresh name and returns its root-relative URL.
    pub async fn save(&self, field_name: &str, original_name: &str, bytes: &[u8]) -> std::io::Result<String> {
        let dir = self.photos_dir();
        tokio::fs::create_dir_all(&dir).await?;
        let ext = Path::new(original_name)
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| e.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or("bin")
            .to_ascii_lowercase();
        let file_name = format!("{field_name}-{}.{ext}", uuid::Uuid::new_v4().simple());
        tokio::fs::write(dir.join(&file_name), bytes).await?;
        Ok(format!("{PUBLIC_PREFIX}{file_name}"))
    }

    /// Removes the file behind a stored URL. A missing file is only logged.
    pub async fn remove(&self, photo_url: &str) {
        let Some(file_name) = photo_url.strip_prefix(PUBLIC_PREFIX) else {
            warn!("photo url {} is not under {}", photo_url, PUBLIC_PREFIX);
            return;
        };
        if file_name.contains('/') || file_name.contains("..") {
            warn!("refusing to delete suspicious photo path {}", photo_url);
            return;
        }
        let path = self.photos_dir().join(file_name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("File not found: {}", path.display())
            }
            Err(e) => error!("Error deleting file {}: {}", path.display(), e),
        }
    }

    /// Absolute URL when a public base is configured, otherwise unchanged.
    pub fn public_url(&self, photo_url: &str) -> String {
        self.public_base
            .as_ref()
            .and_then(|base| base.join(photo_url).ok())
            .map(|url| url.to_string())
            .unwrap_or_else(|| photo_url.to_string())
    }

    pub fn publish(&self, mut photo: Photo) -> Photo {
        photo.photo_url = self.public_url(&photo.photo_url);
        photo
    }
}

/// Records one upload batch. Either every row is stored or none is.
pub async fn insert_all(
    pool: &SqlitePool,
    caption: Option<&str>,
    photo_urls: &[String],
    photo_type: PhotoType,
    created_at: &str,
) -> Result<Vec<Photo>, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let mut stored = Vec::with_capacity(photo_urls.len());
    for photo_url in photo_urls {
        let photo = sqlx::query_as::<_, Photo>(
            "INSERT INTO photos (caption, photo_url, photo_type, created_at) VALUES (?, ?, ?, ?) RETURNING *",
        )
        .bind(caption)
        .bind(photo_url)
        .bind(photo_type.as_str())
        .bind(created_at)
        .fetch_one(&mut *tx)
        .await?;
        stored.push(photo);
    }
    tx.commit().await?;
    Ok(stored)
}

pub async fn list(pool: &SqlitePool, photo_type: Option<PhotoType>) -> Result<Vec<Photo>, sqlx::Error> {
    match photo_type {
        Some(photo_type) => {
            sqlx::query_as::<_, Photo>(
                "SELECT * FROM photos WHERE photo_type = ? ORDER BY created_at DESC, id DESC",
            )
            .bind(photo_type.as_str())
            .fetch_all(pool)
            .await
        }
        None => {
            sqlx::query_as::<_, Photo>("SELECT * FROM photos ORDER BY created_at DESC, id DESC")
                .fetch_all(pool)
                .await
        }
    }
}

pub async fn find(pool: &SqlitePool, id: i64) -> Result<Option<Photo>, sqlx::Error> {
    sqlx::query_as::<_, Photo>("SELECT * FROM photos WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn delete(pool: &SqlitePool, id: i64) -> Result<Option<Photo>, sqlx::Error> {
    sqlx::query_as::<_, Photo>("DELETE FROM photos WHERE id = ? RETURNING *")
        .bind(id)
        .fetch_optional(pool)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;

    fn urls(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| format!("/uploads/photos/{n}.jpg")).collect()
    }

    #[tokio::test]
    async fn failed_batch_leaves_no_rows() {
        let pool = memory_pool().await;
        sqlx::query("CREATE TRIGGER no_c BEFORE INSERT ON photos WHEN NEW.photo_url LIKE '%/c.jpg' \
                     BEGIN SELECT RAISE(ABORT, 'rejected'); END")
            .execute(&pool)
            .await
            .unwrap();

        let result = insert_all(&pool, None, &urls(&["a", "b", "c"]), PhotoType::After, "2025-06-01 10:00:00").await;
        assert!(result.is_err());
        assert!(list(&pool, None).await.unwrap().is_empty());
    }

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("photos-test-{}", uuid::Uuid::new_v4().simple()))
    }

    #[tokio::test]
    async fn photos_are_listed_by_type_newest_first() {
        let pool = memory_pool().await;
        insert_all(&pool, Some("Golf"), &urls(&["a", "b"]), PhotoType::Before, "2025-06-01 10:00:00")
            .await
            .unwrap();
        insert_all(&pool, None, &urls(&["c"]), PhotoType::After, "2025-06-01 10:05:00")
            .await
            .unwrap();
        insert_all(&pool, None, &urls(&["d"]), PhotoType::Before, "2025-06-02 09:00:00")
            .await
            .unwrap();

        let before = list(&pool, Some(PhotoType::Before)).await.unwrap();
        let urls: Vec<_> = before.iter().map(|p| p.photo_url.as_str()).collect();
        assert_eq!(
            urls,
            ["/uploads/photos/d.jpg", "/uploads/photos/b.jpg", "/uploads/photos/a.jpg"]
        );
        assert_eq!(list(&pool, None).await.unwrap().len(), 4);

        let removed = delete(&pool, before[0].id).await.unwrap().unwrap();
        assert_eq!(removed.photo_url, "/uploads/photos/d.jpg");
        assert!(find(&pool, removed.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn saved_files_can_be_removed() {
        let storage = PhotoStorage::new(scratch_dir(), None);
        let url = storage.save("photos", "IMG_1.JPG", b"jpeg bytes").await.unwrap();
        assert!(url.starts_with("/uploads/photos/photos-"));
        assert!(url.ends_with(".jpg"));

        let path = storage.uploads_dir().join(url.trim_start_matches("/uploads/"));
        assert!(path.exists());
        storage.remove(&url).await;
        assert!(!path.exists());
        // second removal only warns
        storage.remove(&url).await;
        let _ = std::fs::remove_dir_all(storage.uploads_dir());
    }

    #[test]
    fn public_urls_use_the_configured_base() {
        let relative = PhotoStorage::new("uploads", None);
        assert_eq!(relative.public_url("/uploads/photos/a.jpg"), "/uploads/photos/a.jpg");

        let absolute = PhotoStorage::new("uploads", Some(Url::parse("https://servisas.lt").unwrap()));
        assert_eq!(
            absolute.public_url("/uploads/photos/a.jpg"),
            "https://servisas.lt/uploads/photos/a.jpg"
        );
    }
}
