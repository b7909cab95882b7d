//! DuckDB-backed implementation of the metric store.

use crate::error::{Error, Result};
use crate::models::{MetricDefinition, MetricKind, MetricSample, Occurrence, TimeRange};
use crate::storage::{MetricStore, MonthlySum, SamplePoint};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duckdb::{params, Config, Connection};
use std::sync::Arc;
use tokio::sync::Mutex;

/// DuckDB-based metric store.
///
/// All statements run behind one connection mutex, so a reader never
/// observes a half-written row. Uniqueness of (occurrence_id, metric_id)
/// is enforced by the samples primary key.
#[derive(Clone)]
pub struct DuckDbStore {
    conn: Arc<Mutex<Connection>>,
}

impl DuckDbStore {
    pub fn new(connection_string: &str) -> Result<Self> {
        let config = Config::default();
        let conn = Connection::open_with_flags(connection_string, config)
            .map_err(|e| Error::Storage(format!("Failed to open database: {e}")))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS metric_definitions (
                id BIGINT PRIMARY KEY,
                name VARCHAR NOT NULL,
                translated_name VARCHAR NOT NULL,
                kind VARCHAR NOT NULL,
                unit VARCHAR,
                sort_key BIGINT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS occurrences (
                id BIGINT PRIMARY KEY,
                name VARCHAR NOT NULL,
                start_ms BIGINT NOT NULL,
                end_ms BIGINT,
                category VARCHAR,
                created_ms BIGINT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS samples (
                occurrence_id BIGINT NOT NULL,
                metric_id BIGINT NOT NULL,
                value_num DOUBLE,
                value_text VARCHAR,
                category VARCHAR,
                modified_ms BIGINT,
                PRIMARY KEY (occurrence_id, metric_id)
            );
            CREATE INDEX IF NOT EXISTS idx_samples_metric_id ON samples(metric_id);
            CREATE INDEX IF NOT EXISTS idx_samples_category ON samples(category);
            CREATE INDEX IF NOT EXISTS idx_occurrences_start ON occurrences(start_ms);
            "#,
        )
        .map_err(|e| Error::Storage(format!("Failed to create tables: {e}")))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn new_in_memory() -> Result<Self> {
        Self::new(":memory:")
    }

    /// Append an optional `AND s.category IN (...)` clause and its
    /// parameters for a label filter set.
    fn category_clause(sql: &mut String, params: &mut Vec<Box<dyn duckdb::ToSql>>, categories: &[String]) {
        if categories.is_empty() {
            return;
        }
        let placeholders = vec!["?"; categories.len()].join(", ");
        sql.push_str(&format!(" AND s.category IN ({placeholders})"));
        for category in categories {
            params.push(Box::new(category.clone()));
        }
    }

    /// Yearly SUM/AVG over a metric's numeric samples; `None` when the
    /// year has no matching sample.
    async fn yearly_aggregate(
        &self,
        metric_id: i64,
        year: i32,
        categories: &[String],
    ) -> Result<Option<(f64, f64)>> {
        let range = TimeRange::calendar_year(year);
        let mut sql = String::from(
            "SELECT SUM(s.value_num), AVG(s.value_num), COUNT(s.value_num) \
             FROM samples s \
             JOIN occurrences o ON o.id = s.occurrence_id \
             WHERE s.metric_id = ? AND s.value_num IS NOT NULL \
               AND o.start_ms >= ? AND o.start_ms <= ?",
        );
        let mut bound: Vec<Box<dyn duckdb::ToSql>> = vec![
            Box::new(metric_id),
            Box::new(range.from_ms()),
            Box::new(range.to_ms()),
        ];
        Self::category_clause(&mut sql, &mut bound, categories);

        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| Error::Storage(format!("Failed to prepare statement: {e}")))?;
        let param_refs: Vec<&dyn duckdb::ToSql> = bound.iter().map(AsRef::as_ref).collect();
        let (sum, mean, count) = stmt
            .query_row(param_refs.as_slice(), |row| {
                Ok((
                    row.get::<_, Option<f64>>(0)?,
                    row.get::<_, Option<f64>>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })
            .map_err(|e| Error::Storage(format!("Query execution failed: {e}")))?;

        if count == 0 {
            return Ok(None);
        }
        match (sum, mean) {
            (Some(sum), Some(mean)) => Ok(Some((sum, mean))),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl MetricStore for DuckDbStore {
    async fn upsert_metric_definition(&self, definition: &MetricDefinition) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO metric_definitions (id, name, translated_name, kind, unit, sort_key) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT (id) DO UPDATE SET \
               name = excluded.name, \
               translated_name = excluded.translated_name, \
               kind = excluded.kind, \
               unit = excluded.unit, \
               sort_key = excluded.sort_key",
            params![
                definition.id,
                definition.name,
                definition.translated_name,
                definition.kind.as_str(),
                definition.unit,
                definition.sort_key,
            ],
        )
        .map_err(|e| Error::Storage(format!("Failed to upsert metric definition: {e}")))?;
        Ok(())
    }

    async fn upsert_occurrence(&self, occurrence: &Occurrence) -> Result<()> {
        let conn = self.conn.lock().await;
        // created_ms sticks with the first insert; re-applying the same
        // payload must not advance the watermark
        conn.execute(
            "INSERT INTO occurrences (id, name, start_ms, end_ms, category, created_ms) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT (id) DO UPDATE SET \
               name = excluded.name, \
               start_ms = excluded.start_ms, \
               end_ms = excluded.end_ms, \
               category = excluded.category",
            params![
                occurrence.id,
                occurrence.name,
                occurrence.start.timestamp_millis(),
                occurrence.end.map(|e| e.timestamp_millis()),
                occurrence.category,
                Utc::now().timestamp_millis(),
            ],
        )
        .map_err(|e| Error::Storage(format!("Failed to upsert occurrence: {e}")))?;
        Ok(())
    }

    async fn upsert_sample(&self, sample: &MetricSample) -> Result<()> {
        let (value_num, value_text) = match &sample.value {
            crate::models::SampleValue::Number(v) => (Some(*v), None),
            crate::models::SampleValue::Text(t) => (None, Some(t.clone())),
        };

        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO samples (occurrence_id, metric_id, value_num, value_text, category, modified_ms) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT (occurrence_id, metric_id) DO UPDATE SET \
               value_num = excluded.value_num, \
               value_text = excluded.value_text, \
               category = excluded.category, \
               modified_ms = excluded.modified_ms",
            params![
                sample.occurrence_id,
                sample.metric_id,
                value_num,
                value_text,
                sample.category,
                sample.modified.map(|m| m.timestamp_millis()),
            ],
        )
        .map_err(|e| Error::Storage(format!("Failed to upsert sample: {e}")))?;
        Ok(())
    }

    async fn numeric_metric_definitions(&self) -> Result<Vec<MetricDefinition>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT id, name, translated_name, kind, unit, sort_key \
                 FROM metric_definitions WHERE kind = 'numeric' \
                 ORDER BY sort_key ASC, id ASC",
            )
            .map_err(|e| Error::Storage(format!("Failed to prepare statement: {e}")))?;

        let rows = stmt
            .query_map(params![], map_definition_row)
            .map_err(|e| Error::Storage(format!("Query execution failed: {e}")))?;

        let mut definitions = Vec::new();
        for row in rows {
            definitions.push(row.map_err(|e| Error::Storage(format!("Row mapping failed: {e}")))?);
        }
        Ok(definitions)
    }

    async fn metric_definition(&self, id: i64) -> Result<Option<MetricDefinition>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT id, name, translated_name, kind, unit, sort_key \
                 FROM metric_definitions WHERE id = ?",
            )
            .map_err(|e| Error::Storage(format!("Failed to prepare statement: {e}")))?;

        let mut rows = stmt
            .query_map(params![id], map_definition_row)
            .map_err(|e| Error::Storage(format!("Query execution failed: {e}")))?;

        match rows.next() {
            Some(row) => Ok(Some(
                row.map_err(|e| Error::Storage(format!("Row mapping failed: {e}")))?,
            )),
            None => Ok(None),
        }
    }

    async fn distinct_categories(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT DISTINCT category FROM samples \
                 WHERE category IS NOT NULL ORDER BY category ASC",
            )
            .map_err(|e| Error::Storage(format!("Failed to prepare statement: {e}")))?;

        let rows = stmt
            .query_map(params![], |row| row.get::<_, String>(0))
            .map_err(|e| Error::Storage(format!("Query execution failed: {e}")))?;

        let mut categories = Vec::new();
        for row in rows {
            categories.push(row.map_err(|e| Error::Storage(format!("Row mapping failed: {e}")))?);
        }
        Ok(categories)
    }

    async fn numeric_samples(
        &self,
        metric_id: i64,
        range: &TimeRange,
        categories: &[String],
    ) -> Result<Vec<SamplePoint>> {
        let mut sql = String::from(
            "SELECT s.value_num, o.start_ms \
             FROM samples s \
             JOIN occurrences o ON o.id = s.occurrence_id \
             WHERE s.metric_id = ? AND s.value_num IS NOT NULL \
               AND o.start_ms >= ? AND o.start_ms <= ?",
        );
        let mut bound: Vec<Box<dyn duckdb::ToSql>> = vec![
            Box::new(metric_id),
            Box::new(range.from_ms()),
            Box::new(range.to_ms()),
        ];
        Self::category_clause(&mut sql, &mut bound, categories);
        sql.push_str(" ORDER BY o.start_ms ASC");

        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| Error::Storage(format!("Failed to prepare statement: {e}")))?;
        let param_refs: Vec<&dyn duckdb::ToSql> = bound.iter().map(AsRef::as_ref).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), |row| {
                Ok(SamplePoint {
                    value: row.get(0)?,
                    start_ms: row.get(1)?,
                })
            })
            .map_err(|e| Error::Storage(format!("Query execution failed: {e}")))?;

        let mut points = Vec::new();
        for row in rows {
            points.push(row.map_err(|e| Error::Storage(format!("Row mapping failed: {e}")))?);
        }
        Ok(points)
    }

    async fn monthly_sums(
        &self,
        metric_id: i64,
        range: &TimeRange,
        categories: &[String],
    ) -> Result<Vec<MonthlySum>> {
        let mut sql = String::from(
            "SELECT CAST(EXTRACT(YEAR FROM epoch_ms(o.start_ms)) AS BIGINT) AS year, \
                    CAST(EXTRACT(MONTH FROM epoch_ms(o.start_ms)) AS BIGINT) AS month, \
                    SUM(s.value_num) \
             FROM samples s \
             JOIN occurrences o ON o.id = s.occurrence_id \
             WHERE s.metric_id = ? AND s.value_num IS NOT NULL \
               AND o.start_ms >= ? AND o.start_ms <= ?",
        );
        let mut bound: Vec<Box<dyn duckdb::ToSql>> = vec![
            Box::new(metric_id),
            Box::new(range.from_ms()),
            Box::new(range.to_ms()),
        ];
        Self::category_clause(&mut sql, &mut bound, categories);
        sql.push_str(" GROUP BY 1, 2 ORDER BY 1, 2");

        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| Error::Storage(format!("Failed to prepare statement: {e}")))?;
        let param_refs: Vec<&dyn duckdb::ToSql> = bound.iter().map(AsRef::as_ref).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), |row| {
                Ok(MonthlySum {
                    year: row.get::<_, i64>(0)? as i32,
                    month: row.get::<_, i64>(1)? as u32,
                    total: row.get(2)?,
                })
            })
            .map_err(|e| Error::Storage(format!("Query execution failed: {e}")))?;

        let mut sums = Vec::new();
        for row in rows {
            sums.push(row.map_err(|e| Error::Storage(format!("Row mapping failed: {e}")))?);
        }
        Ok(sums)
    }

    async fn yearly_sum(
        &self,
        metric_id: i64,
        year: i32,
        categories: &[String],
    ) -> Result<Option<f64>> {
        Ok(self
            .yearly_aggregate(metric_id, year, categories)
            .await?
            .map(|(sum, _)| sum))
    }

    async fn yearly_mean(
        &self,
        metric_id: i64,
        year: i32,
        categories: &[String],
    ) -> Result<Option<f64>> {
        Ok(self
            .yearly_aggregate(metric_id, year, categories)
            .await?
            .map(|(_, mean)| mean))
    }

    async fn sync_watermark(&self) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn.lock().await;
        let max_ms: Option<i64> = conn
            .query_row("SELECT MAX(created_ms) FROM occurrences", params![], |row| {
                row.get(0)
            })
            .map_err(|e| Error::Storage(format!("Query execution failed: {e}")))?;
        Ok(max_ms.and_then(DateTime::<Utc>::from_timestamp_millis))
    }
}

fn map_definition_row(row: &duckdb::Row<'_>) -> duckdb::Result<MetricDefinition> {
    let kind_str: String = row.get(3)?;
    let kind = MetricKind::parse(&kind_str).ok_or_else(|| {
        duckdb::Error::InvalidParameterName(format!("Invalid metric kind: {kind_str}"))
    })?;
    Ok(MetricDefinition {
        id: row.get(0)?,
        name: row.get(1)?,
        translated_name: row.get(2)?,
        kind,
        unit: row.get(4)?,
        sort_key: row.get(5)?,
    })
}
