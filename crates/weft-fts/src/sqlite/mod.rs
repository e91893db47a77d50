//! Embedded relational backend.
//!
//! Each index generation is a pair of tables: a documents table (stable
//! `doc_id`, one typed column per filterable field) and an FTS virtual
//! table carrying the full-text columns, rowid-linked to the documents
//! table. A small control table records which generation is live per
//! model type; promotion flips that flag in one transaction, so readers
//! always see exactly one complete generation.

mod compiler;

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use weft_core::{
    DocumentId, Error, FieldKind, FieldName, FieldSpec, IndexMode, ModelType, Result,
    SpecRegistry,
};
use weft_query::QueryNode;

use crate::backend::{
    FacetCount, IndexGeneration, Ordering, Pagination, SearchBackend, SearchHit, WriteTarget,
};
use crate::document::{Document, FieldValue};
use compiler::{SqlBind, autocomplete_match, compile};

const CONTROL_TABLE: &str = "weft_generations";
const AUTOCOMPLETE_LIMIT: u64 = 10;

/// Search backend over SQLite with its FTS5 extension.
pub struct SqliteBackend {
    name: String,
    pool: SqlitePool,
    registry: Arc<SpecRegistry>,
}

impl SqliteBackend {
    /// Open (creating if needed) the database at `url` and ensure the
    /// control table exists.
    pub async fn connect(
        name: &str,
        url: &str,
        registry: Arc<SpecRegistry>,
    ) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| Error::backend_unavailable(name, format!("bad database url: {e}")))?
            .create_if_missing(true);
        // Single connection: SQLite has one writer, and in-memory
        // databases are per-connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| Error::backend_unavailable(name, e.to_string()))?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {CONTROL_TABLE} (
                model_type TEXT NOT NULL,
                gen_id INTEGER NOT NULL,
                live INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (model_type, gen_id)
            )"
        ))
        .execute(&pool)
        .await
        .map_err(db_err("creating control table"))?;

        Ok(Self {
            name: name.to_string(),
            pool,
            registry,
        })
    }

    fn docs_table(generation: &IndexGeneration) -> String {
        format!("weft_{}_{}", generation.model_type, generation.gen_id)
    }

    fn fts_table(generation: &IndexGeneration) -> String {
        format!("{}_fts", Self::docs_table(generation))
    }

    fn spec(&self, model_type: &ModelType) -> Result<Arc<FieldSpec>> {
        self.registry.get(model_type)
    }

    async fn resolve(&self, target: &WriteTarget) -> Result<IndexGeneration> {
        match target {
            WriteTarget::Generation(generation) => {
                if generation.backend != self.name {
                    return Err(Error::operation(format!(
                        "generation {generation} does not belong to backend '{}'",
                        self.name
                    )));
                }
                Ok(generation.clone())
            }
            WriteTarget::Live(model_type) => {
                self.live_generation(model_type).await?.ok_or_else(|| {
                    Error::operation(format!(
                        "no live generation for '{model_type}' on backend '{}'",
                        self.name
                    ))
                })
            }
        }
    }
}

#[async_trait]
impl SearchBackend for SqliteBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn requires_normalized_text(&self) -> bool {
        true
    }

    async fn create_generation(&self, model_type: &ModelType) -> Result<IndexGeneration> {
        let spec = self.spec(model_type)?;
        let mut tx = self.pool.begin().await.map_err(db_err("begin"))?;

        let row = sqlx::query(&format!(
            "SELECT COALESCE(MAX(gen_id), 0) + 1 AS next FROM {CONTROL_TABLE}
             WHERE model_type = ?"
        ))
        .bind(model_type.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err("allocating generation id"))?;
        let gen_id: i64 = row.try_get("next").map_err(db_err("reading generation id"))?;

        let generation = IndexGeneration {
            model_type: model_type.clone(),
            gen_id: gen_id as u64,
            backend: self.name.clone(),
        };

        sqlx::query(&format!(
            "INSERT INTO {CONTROL_TABLE} (model_type, gen_id, live) VALUES (?, ?, 0)"
        ))
        .bind(model_type.as_str())
        .bind(gen_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err("registering generation"))?;

        let mut columns = String::from("doc_id TEXT NOT NULL UNIQUE");
        for field in spec.filter_fields() {
            let affinity = if field.kind == weft_core::FieldKind::Numeric {
                "REAL"
            } else {
                "TEXT"
            };
            columns.push_str(&format!(", \"f_{}\" {affinity}", field.name));
        }
        sqlx::query(&format!(
            "CREATE TABLE \"{}\" ({columns})",
            Self::docs_table(&generation)
        ))
        .execute(&mut *tx)
        .await
        .map_err(db_err("creating documents table"))?;

        let fts_columns = spec
            .full_text_fields()
            .map(|field| format!("\"{}\"", field.name))
            .collect::<Vec<_>>()
            .join(", ");
        sqlx::query(&format!(
            "CREATE VIRTUAL TABLE \"{}\" USING fts5({fts_columns})",
            Self::fts_table(&generation)
        ))
        .execute(&mut *tx)
        .await
        .map_err(db_err("creating fts table"))?;

        tx.commit().await.map_err(db_err("commit"))?;
        log::debug!("created generation {generation}");
        Ok(generation)
    }

    async fn add_documents(&self, target: &WriteTarget, docs: &[Document]) -> Result<()> {
        if docs.is_empty() {
            return Ok(());
        }
        let generation = self.resolve(target).await?;
        let spec = self.spec(&generation.model_type)?;
        let docs_table = Self::docs_table(&generation);
        let fts_table = Self::fts_table(&generation);

        let filter_fields: Vec<_> = spec.filter_fields().collect();
        let text_fields: Vec<_> = spec.full_text_fields().collect();

        let upsert = if filter_fields.is_empty() {
            format!(
                "INSERT INTO \"{docs_table}\" (doc_id) VALUES (?)
                 ON CONFLICT(doc_id) DO NOTHING"
            )
        } else {
            let cols = filter_fields
                .iter()
                .map(|f| format!("\"f_{}\"", f.name))
                .collect::<Vec<_>>()
                .join(", ");
            let holes = vec!["?"; filter_fields.len()].join(", ");
            let updates = filter_fields
                .iter()
                .map(|f| format!("\"f_{n}\" = excluded.\"f_{n}\"", n = f.name))
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "INSERT INTO \"{docs_table}\" (doc_id, {cols}) VALUES (?, {holes})
                 ON CONFLICT(doc_id) DO UPDATE SET {updates}"
            )
        };

        let fts_insert = {
            let cols = text_fields
                .iter()
                .map(|f| format!("\"{}\"", f.name))
                .collect::<Vec<_>>()
                .join(", ");
            let holes = vec!["?"; text_fields.len()].join(", ");
            format!("INSERT INTO \"{fts_table}\" (rowid, {cols}) VALUES (?, {holes})")
        };

        let mut tx = self.pool.begin().await.map_err(db_err("begin"))?;
        for doc in docs {
            if doc.id.model_type != generation.model_type {
                return Err(Error::operation(format!(
                    "document '{}' does not belong to model type '{}'",
                    doc.id, generation.model_type
                )));
            }
            let mut query = sqlx::query(&upsert).bind(doc.id.to_string());
            for field in &filter_fields {
                query = match doc.value(&field.name) {
                    None => query.bind(Option::<String>::None),
                    Some(FieldValue::Number(n)) => query.bind(*n),
                    Some(value) => query.bind(value.flatten()),
                };
            }
            query
                .execute(&mut *tx)
                .await
                .map_err(db_err("upserting document"))?;

            let row = sqlx::query(&format!(
                "SELECT rowid FROM \"{docs_table}\" WHERE doc_id = ?"
            ))
            .bind(doc.id.to_string())
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err("resolving document rowid"))?;
            let rowid: i64 = row.try_get("rowid").map_err(db_err("reading rowid"))?;

            sqlx::query(&format!("DELETE FROM \"{fts_table}\" WHERE rowid = ?"))
                .bind(rowid)
                .execute(&mut *tx)
                .await
                .map_err(db_err("clearing fts row"))?;

            let mut query = sqlx::query(&fts_insert).bind(rowid);
            for field in &text_fields {
                let text = doc
                    .value(&field.name)
                    .map(FieldValue::flatten)
                    .unwrap_or_default();
                query = query.bind(text);
            }
            query
                .execute(&mut *tx)
                .await
                .map_err(db_err("inserting fts row"))?;
        }
        tx.commit().await.map_err(db_err("commit"))?;
        Ok(())
    }

    async fn delete_document(&self, target: &WriteTarget, id: &DocumentId) -> Result<()> {
        let generation = self.resolve(target).await?;
        let docs_table = Self::docs_table(&generation);
        let fts_table = Self::fts_table(&generation);

        let mut tx = self.pool.begin().await.map_err(db_err("begin"))?;
        let row = sqlx::query(&format!(
            "SELECT rowid FROM \"{docs_table}\" WHERE doc_id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err("resolving document rowid"))?;

        // Deleting an absent document is a no-op.
        if let Some(row) = row {
            let rowid: i64 = row.try_get("rowid").map_err(db_err("reading rowid"))?;
            sqlx::query(&format!("DELETE FROM \"{fts_table}\" WHERE rowid = ?"))
                .bind(rowid)
                .execute(&mut *tx)
                .await
                .map_err(db_err("deleting fts row"))?;
            sqlx::query(&format!("DELETE FROM \"{docs_table}\" WHERE rowid = ?"))
                .bind(rowid)
                .execute(&mut *tx)
                .await
                .map_err(db_err("deleting document"))?;
        }
        tx.commit().await.map_err(db_err("commit"))?;
        Ok(())
    }

    async fn promote(&self, generation: &IndexGeneration) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err("begin"))?;
        let exists = sqlx::query(&format!(
            "SELECT live FROM {CONTROL_TABLE} WHERE model_type = ? AND gen_id = ?"
        ))
        .bind(generation.model_type.as_str())
        .bind(generation.gen_id as i64)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err("checking generation"))?;
        if exists.is_none() {
            return Err(Error::not_found(format!("generation {generation}")));
        }

        sqlx::query(&format!(
            "UPDATE {CONTROL_TABLE} SET live = 0 WHERE model_type = ?"
        ))
        .bind(generation.model_type.as_str())
        .execute(&mut *tx)
        .await
        .map_err(db_err("demoting live generation"))?;
        sqlx::query(&format!(
            "UPDATE {CONTROL_TABLE} SET live = 1 WHERE model_type = ? AND gen_id = ?"
        ))
        .bind(generation.model_type.as_str())
        .bind(generation.gen_id as i64)
        .execute(&mut *tx)
        .await
        .map_err(db_err("promoting generation"))?;
        tx.commit().await.map_err(db_err("commit"))?;
        log::info!("promoted generation {generation}");
        Ok(())
    }

    async fn retire(&self, generation: &IndexGeneration) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err("begin"))?;
        let row = sqlx::query(&format!(
            "SELECT live FROM {CONTROL_TABLE} WHERE model_type = ? AND gen_id = ?"
        ))
        .bind(generation.model_type.as_str())
        .bind(generation.gen_id as i64)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err("checking generation"))?;
        let live: i64 = match row {
            None => return Err(Error::not_found(format!("generation {generation}"))),
            Some(row) => row.try_get("live").map_err(db_err("reading live flag"))?,
        };
        if live != 0 {
            return Err(Error::operation(format!(
                "cannot retire live generation {generation}"
            )));
        }

        sqlx::query(&format!(
            "DROP TABLE IF EXISTS \"{}\"",
            Self::fts_table(generation)
        ))
        .execute(&mut *tx)
        .await
        .map_err(db_err("dropping fts table"))?;
        sqlx::query(&format!(
            "DROP TABLE IF EXISTS \"{}\"",
            Self::docs_table(generation)
        ))
        .execute(&mut *tx)
        .await
        .map_err(db_err("dropping documents table"))?;
        sqlx::query(&format!(
            "DELETE FROM {CONTROL_TABLE} WHERE model_type = ? AND gen_id = ?"
        ))
        .bind(generation.model_type.as_str())
        .bind(generation.gen_id as i64)
        .execute(&mut *tx)
        .await
        .map_err(db_err("deregistering generation"))?;
        tx.commit().await.map_err(db_err("commit"))?;
        log::debug!("retired generation {generation}");
        Ok(())
    }

    async fn live_generation(&self, model_type: &ModelType) -> Result<Option<IndexGeneration>> {
        let row = sqlx::query(&format!(
            "SELECT gen_id FROM {CONTROL_TABLE} WHERE model_type = ? AND live = 1"
        ))
        .bind(model_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("reading live generation"))?;
        match row {
            None => Ok(None),
            Some(row) => {
                let gen_id: i64 = row.try_get("gen_id").map_err(db_err("reading gen_id"))?;
                Ok(Some(IndexGeneration {
                    model_type: model_type.clone(),
                    gen_id: gen_id as u64,
                    backend: self.name.clone(),
                }))
            }
        }
    }

    async fn search(
        &self,
        model_type: &ModelType,
        query: &QueryNode,
        page: Pagination,
        order: &Ordering,
    ) -> Result<Vec<SearchHit>> {
        let Some(generation) = self.live_generation(model_type).await? else {
            log::warn!(
                "search against '{model_type}' on backend '{}' with no live generation",
                self.name
            );
            return Ok(Vec::new());
        };
        let spec = self.spec(model_type)?;
        let docs_table = Self::docs_table(&generation);
        let fts_table = Self::fts_table(&generation);
        let compiled = compile(query, &fts_table)?;

        let (select, score_match) = match order {
            Ordering::Relevance => match &compiled.score_match {
                Some(matcher) => {
                    let weights = spec
                        .full_text_fields()
                        .map(|f| format!(", {:?}", f64::from(f.effective_boost())))
                        .collect::<String>();
                    (
                        format!(
                            "SELECT d.doc_id, COALESCE(s.score, 0.0) AS score
                             FROM \"{docs_table}\" d
                             LEFT JOIN (
                                 SELECT rowid, -bm25(\"{fts_table}\"{weights}) AS score
                                 FROM \"{fts_table}\" WHERE \"{fts_table}\" MATCH ?
                             ) s ON s.rowid = d.rowid
                             WHERE {predicate}
                             ORDER BY score DESC, d.doc_id ASC
                             LIMIT ? OFFSET ?",
                            predicate = compiled.predicate
                        ),
                        Some(matcher.clone()),
                    )
                }
                None => (
                    format!(
                        "SELECT d.doc_id, 0.0 AS score FROM \"{docs_table}\" d
                         WHERE {predicate}
                         ORDER BY d.doc_id ASC
                         LIMIT ? OFFSET ?",
                        predicate = compiled.predicate
                    ),
                    None,
                ),
            },
            Ordering::Field { name, descending } => {
                let known = spec
                    .field(name)
                    .is_some_and(|f| f.mode == IndexMode::Exact);
                if !known {
                    return Err(Error::invalid_query(format!(
                        "cannot order by '{name}': not a filterable field of '{model_type}'"
                    )));
                }
                let direction = if *descending { "DESC" } else { "ASC" };
                (
                    format!(
                        "SELECT d.doc_id, 0.0 AS score FROM \"{docs_table}\" d
                         WHERE {predicate}
                         ORDER BY d.\"f_{name}\" {direction}, d.doc_id ASC
                         LIMIT ? OFFSET ?",
                        predicate = compiled.predicate
                    ),
                    None,
                )
            }
        };

        let mut sql_query = sqlx::query(&select);
        if let Some(matcher) = &score_match {
            sql_query = sql_query.bind(matcher.as_str());
        }
        for bind in &compiled.binds {
            sql_query = match bind {
                SqlBind::Text(s) => sql_query.bind(s.as_str()),
                SqlBind::Real(r) => sql_query.bind(*r),
            };
        }
        sql_query = sql_query.bind(page.limit as i64).bind(page.offset as i64);

        let rows = sql_query
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("running search"))?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let doc_id: String = row.try_get("doc_id").map_err(db_err("reading doc_id"))?;
            let score: f64 = row.try_get("score").map_err(db_err("reading score"))?;
            let id = doc_id
                .parse::<DocumentId>()
                .map_err(|e| Error::operation(format!("corrupt doc_id '{doc_id}': {e}")))?;
            hits.push(SearchHit {
                id,
                score: score as f32,
            });
        }
        Ok(hits)
    }

    async fn autocomplete(
        &self,
        model_type: &ModelType,
        prefix: &str,
        field: &FieldName,
    ) -> Result<Vec<DocumentId>> {
        let prefix = prefix.trim();
        if prefix.is_empty() {
            return Ok(Vec::new());
        }
        let spec = self.spec(model_type)?;
        let supported = spec
            .field(field)
            .is_some_and(|f| f.mode == IndexMode::Autocomplete);
        if !supported {
            return Err(Error::invalid_query(format!(
                "'{field}' is not an autocomplete field of '{model_type}'"
            )));
        }
        let Some(generation) = self.live_generation(model_type).await? else {
            log::warn!(
                "autocomplete against '{model_type}' on backend '{}' with no live generation",
                self.name
            );
            return Ok(Vec::new());
        };
        let docs_table = Self::docs_table(&generation);
        let fts_table = Self::fts_table(&generation);

        let rows = sqlx::query(&format!(
            "SELECT d.doc_id
             FROM \"{docs_table}\" d
             JOIN (
                 SELECT rowid, rank FROM \"{fts_table}\" WHERE \"{fts_table}\" MATCH ?
             ) m ON m.rowid = d.rowid
             ORDER BY m.rank
             LIMIT ?"
        ))
        .bind(autocomplete_match(field, prefix))
        .bind(AUTOCOMPLETE_LIMIT as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("running autocomplete"))?;

        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            let doc_id: String = row.try_get("doc_id").map_err(db_err("reading doc_id"))?;
            let id = doc_id
                .parse::<DocumentId>()
                .map_err(|e| Error::operation(format!("corrupt doc_id '{doc_id}': {e}")))?;
            ids.push(id);
        }
        Ok(ids)
    }

    async fn facet(
        &self,
        model_type: &ModelType,
        query: &QueryNode,
        field: &FieldName,
    ) -> Result<Vec<FacetCount>> {
        let spec = self.spec(model_type)?;
        let Some(declared) = spec.field(field).filter(|f| f.mode == IndexMode::Exact) else {
            return Err(Error::invalid_query(format!(
                "cannot facet on '{field}': not a filterable field of '{model_type}'"
            )));
        };
        let numeric = declared.kind == FieldKind::Numeric;
        let Some(generation) = self.live_generation(model_type).await? else {
            log::warn!(
                "facet against '{model_type}' on backend '{}' with no live generation",
                self.name
            );
            return Ok(Vec::new());
        };
        let docs_table = Self::docs_table(&generation);
        let fts_table = Self::fts_table(&generation);
        let compiled = compile(query, &fts_table)?;

        let select = format!(
            "SELECT d.\"f_{field}\" AS value, COUNT(*) AS n
             FROM \"{docs_table}\" d
             WHERE {predicate}
             GROUP BY d.\"f_{field}\"
             ORDER BY n DESC, value ASC",
            predicate = compiled.predicate
        );
        let mut sql_query = sqlx::query(&select);
        for bind in &compiled.binds {
            sql_query = match bind {
                SqlBind::Text(s) => sql_query.bind(s.as_str()),
                SqlBind::Real(r) => sql_query.bind(*r),
            };
        }
        let rows = sql_query
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("running facet"))?;

        let mut counts = Vec::with_capacity(rows.len());
        for row in rows {
            let value: Option<String> = if numeric {
                let raw: Option<f64> =
                    row.try_get("value").map_err(db_err("reading facet value"))?;
                raw.map(|n| n.to_string())
            } else {
                row.try_get("value").map_err(db_err("reading facet value"))?
            };
            let n: i64 = row.try_get("n").map_err(db_err("reading facet count"))?;
            counts.push(FacetCount {
                value,
                count: n as u64,
            });
        }
        Ok(counts)
    }
}

fn db_err(context: &'static str) -> impl FnOnce(sqlx::Error) -> Error {
    move |e| match e {
        // Connection-level failures are transient; callers can retry.
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            Error::backend_unavailable("sqlite", format!("{context}: {e}"))
        }
        other => Error::operation(format!("sqlite {context}: {other}")),
    }
}

// ============================================================================
// Tests
// ============================================================================
