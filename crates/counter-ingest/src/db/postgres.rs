//! PostgreSQL implementation of [`UsageStore`]

use super::{UsageStore, LOAD_CHUNK_SIZE};
use crate::dedup::UsageTriple;
use crate::error::StoreError;
use crate::sequencer::Relation;
use crate::sushi::SourcedUsageRecord;
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, info, instrument};

const COUNTER_DATA_COLUMNS: &str = "counter_data_id, statistics_source_id, report_type, \
    report_creation_date, resource_name, publisher, publisher_id, platform, authors, \
    publication_date, article_version, doi, proprietary_id, isbn, print_issn, online_issn, uri, \
    data_type, section_type, yop, access_type, access_method, parent_title, parent_publisher, \
    parent_publisher_id, parent_platform, parent_authors, parent_publication_date, \
    parent_article_version, parent_doi, parent_proprietary_id, parent_isbn, parent_print_issn, \
    parent_online_issn, parent_uri, parent_data_type, parent_section_type, parent_yop, \
    parent_access_type, parent_access_method, usage_date, metric_type, usage_count";

#[derive(Clone)]
pub struct PgUsageStore {
    pool: PgPool,
}

impl PgUsageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl UsageStore for PgUsageStore {
    #[instrument(skip(self))]
    async fn count_existing_usage(&self, triple: &UsageTriple) -> Result<i64, StoreError> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM counter_data \
             WHERE statistics_source_id = $1 AND report_type = $2 AND usage_date = $3",
        )
        .bind(triple.statistics_source_id)
        .bind(&triple.report_type)
        .bind(triple.usage_date)
        .fetch_one(&self.pool)
        .await
        .map_err(|source| StoreError::unavailable("count_existing_usage", source))
    }

    #[instrument(skip(self))]
    async fn statistics_source_name(&self, statistics_source_id: i64) -> Result<Option<String>, StoreError> {
        sqlx::query_scalar::<_, String>(
            "SELECT statistics_source_name FROM statistics_sources WHERE statistics_source_id = $1",
        )
        .bind(statistics_source_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|source| StoreError::unavailable("statistics_source_name", source))
    }

    #[instrument(skip(self))]
    async fn max_primary_key(&self, relation: Relation) -> Result<Option<i64>, StoreError> {
        // Identifiers come from the closed `Relation` enum, never from input
        let sql = format!(
            "SELECT {key}::BIGINT FROM {table} ORDER BY {key} DESC LIMIT 1",
            key = relation.key_column(),
            table = relation.table(),
        );

        sqlx::query_scalar::<_, i64>(&sql)
            .fetch_optional(&self.pool)
            .await
            .map_err(|source| StoreError::unavailable("max_primary_key", source))
    }

    #[instrument(skip(self, records), fields(records = records.len()))]
    async fn insert_usage(&self, first_key: i64, records: &[SourcedUsageRecord]) -> Result<u64, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|source| StoreError::unavailable("insert_usage", source))?;

        let mut inserted = 0u64;
        for (chunk_index, chunk) in records.chunks(LOAD_CHUNK_SIZE).enumerate() {
            let chunk_first_key = first_key + (chunk_index * LOAD_CHUNK_SIZE) as i64;
            let mut builder: QueryBuilder<Postgres> =
                QueryBuilder::new(format!("INSERT INTO counter_data ({}) ", COUNTER_DATA_COLUMNS));

            builder.push_values(chunk.iter().enumerate(), |mut row, (offset, sourced)| {
                let record = &sourced.record;
                let item = &record.item;
                let parent = &record.parent;
                row.push_bind(chunk_first_key + offset as i64)
                    .push_bind(sourced.statistics_source_id)
                    .push_bind(sourced.report_type.clone())
                    .push_bind(record.report_creation_date)
                    .push_bind(item.resource_name.clone())
                    .push_bind(item.publisher.clone())
                    .push_bind(item.publisher_id.clone())
                    .push_bind(item.platform.clone())
                    .push_bind(item.authors.clone())
                    .push_bind(item.publication_date)
                    .push_bind(item.article_version.clone())
                    .push_bind(item.doi.clone())
                    .push_bind(item.proprietary_id.clone())
                    .push_bind(item.isbn.clone())
                    .push_bind(item.print_issn.clone())
                    .push_bind(item.online_issn.clone())
                    .push_bind(item.uri.clone())
                    .push_bind(item.data_type.clone())
                    .push_bind(item.section_type.clone())
                    .push_bind(item.yop)
                    .push_bind(item.access_type.clone())
                    .push_bind(item.access_method.clone())
                    .push_bind(parent.resource_name.clone())
                    .push_bind(parent.publisher.clone())
                    .push_bind(parent.publisher_id.clone())
                    .push_bind(parent.platform.clone())
                    .push_bind(parent.authors.clone())
                    .push_bind(parent.publication_date)
                    .push_bind(parent.article_version.clone())
                    .push_bind(parent.doi.clone())
                    .push_bind(parent.proprietary_id.clone())
                    .push_bind(parent.isbn.clone())
                    .push_bind(parent.print_issn.clone())
                    .push_bind(parent.online_issn.clone())
                    .push_bind(parent.uri.clone())
                    .push_bind(parent.data_type.clone())
                    .push_bind(parent.section_type.clone())
                    .push_bind(parent.yop)
                    .push_bind(parent.access_type.clone())
                    .push_bind(parent.access_method.clone())
                    .push_bind(record.usage_date)
                    .push_bind(record.metric_type.clone())
                    .push_bind(record.usage_count);
            });

            let result = builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(|source| StoreError::unavailable("insert_usage", source))?;
            inserted += result.rows_affected();
            debug!(chunk = chunk_index, rows = chunk.len(), "Inserted usage chunk");
        }

        tx.commit()
            .await
            .map_err(|source| StoreError::unavailable("insert_usage", source))?;

        info!(inserted, first_key, "Loaded usage records");
        Ok(inserted)
    }
}
