use crate::error::{Error, ErrorKind};
use crate::models::timestamp;
use exn::ResultExt;
use tankobon_model::{ChapterMetadata, ChapterRecord};

#[derive(sqlx::FromRow)]
pub(crate) struct ChapterRow {
    pub chapter_id: String,
    pub manga_id: String,
    pub pages_count: i64,
    pub translated_language: String,
    pub external_url: Option<String>,
    pub chapter: Option<String>,
    pub volume: Option<String>,
    pub title: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub cached_at: i64,
}
impl From<&ChapterRecord> for ChapterRow {
    fn from(record: &ChapterRecord) -> Self {
        Self {
            chapter_id: record.id.to_string(),
            manga_id: record.manga_id.to_string(),
            pages_count: i64::from(record.pages_count),
            translated_language: record.translated_language.clone(),
            external_url: record.external_url.clone(),
            chapter: record.chapter.clone(),
            volume: record.volume.clone(),
            title: record.title.clone(),
            created_at: record.created_at.unix_timestamp(),
            updated_at: record.updated_at.unix_timestamp(),
            cached_at: record.cached_at.unix_timestamp(),
        }
    }
}
impl TryFrom<ChapterRow> for ChapterRecord {
    type Error = Error;
    fn try_from(row: ChapterRow) -> Result<Self, Self::Error> {
        let metadata = ChapterMetadata {
            id: row.chapter_id.into(),
            manga_id: row.manga_id.into(),
            translated_language: row.translated_language,
            external_url: row.external_url,
            chapter: row.chapter,
            volume: row.volume,
            title: row.title,
            created_at: timestamp(row.created_at, "chapter creation date")?,
            updated_at: timestamp(row.updated_at, "chapter update date")?,
        };
        let pages_count = u32::try_from(row.pages_count).or_raise(|| ErrorKind::InvalidData("pages count"))?;
        Ok(ChapterRecord::from_parts(metadata, pages_count, timestamp(row.cached_at, "cache date")?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tankobon_model::ChapterId;
    use time::UtcDateTime;

    fn row(pages_count: i64) -> ChapterRow {
        let now = UtcDateTime::now().unix_timestamp();
        ChapterRow {
            chapter_id: "a54c491c-8e4c-4e97-8873-5b79e59da210".to_string(),
            manga_id: "801513ba-a712-498c-8f57-cae55b38cc92".to_string(),
            pages_count,
            translated_language: "en".to_string(),
            external_url: None,
            chapter: Some("77.6".to_string()),
            volume: Some("9".to_string()),
            title: Some("Extra".to_string()),
            created_at: now,
            updated_at: now,
            cached_at: now,
        }
    }

    #[test]
    fn test_row_to_model() {
        let record = ChapterRecord::try_from(row(24)).unwrap();
        assert_eq!(record.id, ChapterId::from("a54c491c-8e4c-4e97-8873-5b79e59da210"));
        assert_eq!(record.pages_count, 24);
        assert_eq!(record.chapter.as_deref(), Some("77.6"));
    }

    #[test]
    fn test_negative_page_count_is_invalid() {
        assert!(ChapterRecord::try_from(row(-1)).is_err());
    }

    #[test]
    fn test_model_to_row() {
        let cached = UtcDateTime::now();
        let mut record = ChapterMetadata::new("c1", "m1", "ja").with_title("Prologue").into_record(3);
        record.cached_at = cached;
        let row = ChapterRow::from(&record);
        assert_eq!(row.pages_count, 3);
        assert_eq!(row.translated_language, "ja");
        // Converting to a Unix timestamp (measured in seconds) inherently strips the nanoseconds component.
        let back = ChapterRecord::try_from(row).unwrap();
        assert_eq!(back.cached_at, cached.replace_nanosecond(0).unwrap());
    }
}
