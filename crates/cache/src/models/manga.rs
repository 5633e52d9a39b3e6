use crate::error::Error;
use crate::models::timestamp;
use tankobon_model::MangaRecord;

#[derive(sqlx::FromRow)]
pub(crate) struct MangaRow {
    pub manga_id: String,
    pub last_read_chapter_id: Option<String>,
    pub saved_for_offline: bool,
    pub added_at: i64,
}
impl TryFrom<MangaRow> for MangaRecord {
    type Error = Error;
    fn try_from(row: MangaRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.manga_id.into(),
            last_read_chapter: row.last_read_chapter_id.map(Into::into),
            saved_for_offline: row.saved_for_offline,
            added_at: timestamp(row.added_at, "manga added date")?,
        })
    }
}
