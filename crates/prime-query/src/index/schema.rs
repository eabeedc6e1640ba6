use tantivy::schema::*;

/// Field handles for the memory index.
pub struct MemorySchema {
    pub schema: Schema,
    pub note_id: Field,
    pub kind: Field,
    pub category: Field,
    pub tags: Field,
    pub content: Field,
    pub path: Field,
    pub created_at: Field,
}

impl MemorySchema {
    pub fn new() -> Self {
        let mut builder = Schema::builder();

        let note_id = builder.add_text_field("note_id", STRING | STORED);
        let kind = builder.add_text_field("kind", STRING | STORED);
        let category = builder.add_text_field("category", TEXT | STORED);
        // Raw tags, one value per tag.
        let tags = builder.add_text_field("tags", STRING | STORED);
        let content = builder.add_text_field("content", TEXT | STORED);
        let path = builder.add_text_field("path", STRING | STORED);
        let created_at = builder.add_date_field("created_at", INDEXED | STORED);

        let schema = builder.build();

        Self {
            schema,
            note_id,
            kind,
            category,
            tags,
            content,
            path,
            created_at,
        }
    }
}

impl Default for MemorySchema {
    fn default() -> Self {
        Self::new()
    }
}
