use crate::error::{MediaError, Result};
use crate::metadata_store::MetadataStore;
use crate::notifications::StorageWrite;
use crate::object_store::{file_stem, record_id_from_key, thumbnail_key, ObjectStore};
use crate::record::{now_millis, MetadataRecord, RecordPatch};
use crate::thumbnail::{self, THUMBNAIL_CONTENT_TYPE};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Reacts to storage-write notifications for uploaded originals.
///
/// Analysis and thumbnailing are independent: each reads the object on its
/// own and writes a disjoint set of record fields.
pub struct EventProcessor {
    metadata: Arc<dyn MetadataStore>,
    objects: Arc<dyn ObjectStore>,
    thumbnail_size: u32,
}

impl EventProcessor {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        objects: Arc<dyn ObjectStore>,
        thumbnail_size: u32,
    ) -> Self {
        Self {
            metadata,
            objects,
            thumbnail_size,
        }
    }

    /// Read the uploaded object's dimensions and mark the record uploaded
    #[instrument(skip(self, write), fields(key = %write.key, size = write.size))]
    pub async fn analyze_upload(&self, write: &StorageWrite) -> Result<MetadataRecord> {
        let id = record_id_from_key(&write.key)?;
        let data = self.objects.get(&write.bucket, &write.key).await?;
        let (width, height) = thumbnail::read_dimensions(&data)?;

        debug!(id = %id, width, height, "Read image dimensions");

        let record = self
            .metadata
            .update(
                id,
                &RecordPatch::MarkUploaded {
                    size: write.size,
                    width,
                    height,
                },
                now_millis(),
            )
            .await?;

        metrics::counter!("media.uploads.analyzed").increment(1);
        info!(id = %id, width, height, "Upload analyzed");

        Ok(record)
    }

    /// Generate the square thumbnail, store it next to the original and mark
    /// the record thumbnailed
    #[instrument(skip(self, write), fields(key = %write.key))]
    pub async fn create_thumbnail(&self, write: &StorageWrite) -> Result<MetadataRecord> {
        let id = record_id_from_key(&write.key)?;
        let data = self.objects.get(&write.bucket, &write.key).await?;

        let size = self.thumbnail_size;
        let png = tokio::task::spawn_blocking(move || thumbnail::create_thumbnail(&data, size))
            .await
            .map_err(|e| MediaError::Encode(format!("thumbnail task failed: {e}")))??;

        let key = thumbnail_key(id, &file_stem(&write.key));
        let png_len = png.len();
        self.objects
            .put(&write.bucket, &key, png, THUMBNAIL_CONTENT_TYPE)
            .await?;

        let record = self
            .metadata
            .update(id, &RecordPatch::MarkThumbnailed, now_millis())
            .await?;

        metrics::counter!("media.thumbnails.created").increment(1);
        info!(id = %id, thumbnail_key = %key, size_bytes = png_len, "Thumbnail stored");

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata_store::InMemoryMetadataStore;
    use crate::object_store::{image_key, InMemoryObjectStore, MockObjectStore};
    use chrono::Utc;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::io::Cursor;

    const ID: &str = "34d4b1ab-edfb-4b21-83e9-642e2f623345";
    const BUCKET: &str = "media-bucket";

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(RgbImage::new(width, height))
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    fn write(key: String) -> StorageWrite {
        StorageWrite {
            bucket: BUCKET.into(),
            key,
            size: 12345,
        }
    }

    async fn seeded_metadata() -> Arc<InMemoryMetadataStore> {
        let metadata = Arc::new(InMemoryMetadataStore::new());
        metadata
            .put(&MetadataRecord::new(ID, "dog.png", Utc::now()))
            .await
            .unwrap();
        metadata
    }

    #[tokio::test]
    async fn test_analysis_marks_record_uploaded() {
        let metadata = seeded_metadata().await;
        let objects = Arc::new(InMemoryObjectStore::new());
        let key = image_key(ID, "dog.png");
        objects.put(BUCKET, &key, png(64, 48), "image/png").await.unwrap();

        let processor = EventProcessor::new(metadata.clone(), objects, 16);
        let record = processor.analyze_upload(&write(key)).await.unwrap();

        assert!(record.is_uploaded);
        assert_eq!(record.size, Some(12345));
        assert_eq!((record.width, record.height), (Some(64), Some(48)));
        assert!(record.updated_at.is_some());
        assert_eq!(metadata.get(ID).await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn test_thumbnail_is_written_under_stem_key() {
        let metadata = seeded_metadata().await;
        let key = image_key(ID, "dog.png");
        let original = png(40, 20);

        let mut objects = MockObjectStore::new();
        let expected_key = key.clone();
        objects
            .expect_get()
            .withf(move |bucket, key| bucket == BUCKET && key == expected_key)
            .times(1)
            .returning(move |_, _| Ok(original.clone()));
        objects
            .expect_put()
            .withf(|bucket, key, data, content_type| {
                bucket == BUCKET
                    && key == format!("thumbnails/{ID}/dog.png")
                    && content_type == "image/png"
                    && image::guess_format(data).ok() == Some(ImageFormat::Png)
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let processor = EventProcessor::new(metadata.clone(), Arc::new(objects), 16);
        let record = processor.create_thumbnail(&write(key)).await.unwrap();

        assert_eq!(record.has_thumbnail, Some(true));
        assert!(!record.is_uploaded);
    }

    #[tokio::test]
    async fn test_thumbnail_has_configured_size() {
        let metadata = seeded_metadata().await;
        let objects = Arc::new(InMemoryObjectStore::new());
        let key = image_key(ID, "dog.png");
        objects.put(BUCKET, &key, png(30, 90), "image/png").await.unwrap();

        let processor = EventProcessor::new(metadata, objects.clone(), 24);
        processor.create_thumbnail(&write(key)).await.unwrap();

        let stored = objects
            .object(BUCKET, &format!("thumbnails/{ID}/dog.png"))
            .expect("thumbnail stored");
        let decoded = thumbnail::decode(&stored.data).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (24, 24));
    }

    #[tokio::test]
    async fn test_missing_record_is_condition_failure() {
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let objects = Arc::new(InMemoryObjectStore::new());
        let key = image_key(ID, "dog.png");
        objects.put(BUCKET, &key, png(8, 8), "image/png").await.unwrap();

        let processor = EventProcessor::new(metadata.clone(), objects, 16);
        let result = processor.analyze_upload(&write(key)).await;

        assert!(matches!(result, Err(MediaError::ConditionFailed { .. })));
        assert_eq!(metadata.get(ID).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_undecodable_object_leaves_record_pending() {
        let metadata = seeded_metadata().await;
        let objects = Arc::new(InMemoryObjectStore::new());
        let key = image_key(ID, "dog.png");
        objects.put(BUCKET, &key, b"garbage".to_vec(), "image/png").await.unwrap();

        let processor = EventProcessor::new(metadata.clone(), objects, 16);

        assert!(matches!(
            processor.analyze_upload(&write(key.clone())).await,
            Err(MediaError::Decode(_))
        ));
        assert!(matches!(
            processor.create_thumbnail(&write(key)).await,
            Err(MediaError::Decode(_))
        ));
        let record = metadata.get(ID).await.unwrap().unwrap();
        assert!(!record.is_uploaded);
        assert_eq!(record.has_thumbnail, None);
    }

    #[tokio::test]
    async fn test_short_key_is_rejected_before_any_io() {
        let mut objects = MockObjectStore::new();
        objects.expect_get().never();

        let processor = EventProcessor::new(
            Arc::new(InMemoryMetadataStore::new()),
            Arc::new(objects),
            16,
        );

        assert!(matches!(
            processor.analyze_upload(&write("images/dog.png".into())).await,
            Err(MediaError::InvalidObjectKey(_))
        ));
    }
}
