/// PostgreSQL-backed implementation of PaperStore
///
/// Uses sqlx with PgPool for connection pooling. Authors are normalized into
/// their own table (unique by name) and linked to papers with an explicit
/// byline order. References live in `paper_references`; ids they name that
/// are not stored yet are inserted as stub rows in the same transaction.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{
    postgres::{PgPool, PgPoolOptions, PgRow},
    Postgres, Row, Transaction,
};
use std::time::Duration;
use uuid::Uuid;

use crate::errors::ScholarError;
use crate::store::{dedup_references, CreatePaper, Paper, PaperDocument, PaperPage, PaperStore, UpdatePaper};

/// Columns for a full paper row, with authors aggregated in byline order.
/// References come from a correlated subquery so the author join is not multiplied.
const PAPER_SELECT: &str = "SELECT p.id, p.title, p.abstract, p.venue, p.year, p.n_citation, p.doi, \
     p.is_stub, p.in_chroma, p.created_at, p.updated_at, \
     COALESCE(array_agg(a.name ORDER BY pa.author_order) FILTER (WHERE a.name IS NOT NULL), '{}') AS authors, \
     COALESCE((SELECT array_agg(r.cited_id ORDER BY r.ref_order) FROM paper_references r \
               WHERE r.citing_id = p.id), '{}') AS reference_ids \
     FROM papers p \
     LEFT JOIN paper_authors pa ON pa.paper_id = p.id \
     LEFT JOIN authors a ON a.id = pa.author_id";

pub struct PostgresPaperStore {
    pool: PgPool,
}

impl PostgresPaperStore {
    /// Connect to `database_url`, optionally running pending migrations.
    pub async fn new(database_url: &str, run_migrations: bool) -> Result<Self, ScholarError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(1)
            .idle_timeout(Duration::from_secs(300))
            .max_lifetime(Duration::from_secs(1800))
            .connect(database_url)
            .await
            .map_err(|e| ScholarError::Storage(format!("Failed to connect to database: {}", e)))?;

        let store = PostgresPaperStore { pool };
        if run_migrations {
            store.migrate().await?;
        }
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), ScholarError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| ScholarError::Storage(format!("Migration failed: {}", e)))?;
        tracing::info!("Database migrations applied");
        Ok(())
    }

    /// Replace a paper's author links, creating unknown authors on the way.
    async fn link_authors(
        tx: &mut Transaction<'_, Postgres>,
        paper_id: &str,
        authors: &[String],
    ) -> Result<(), ScholarError> {
        sqlx::query("DELETE FROM paper_authors WHERE paper_id = $1")
            .bind(paper_id)
            .execute(&mut **tx)
            .await?;

        for (order, name) in authors.iter().enumerate() {
            sqlx::query("INSERT INTO authors (id, name) VALUES ($1, $2) ON CONFLICT (name) DO NOTHING")
                .bind(Uuid::new_v4())
                .bind(name)
                .execute(&mut **tx)
                .await?;

            let author_id: Uuid = sqlx::query_scalar("SELECT id FROM authors WHERE name = $1")
                .bind(name)
                .fetch_one(&mut **tx)
                .await?;

            // Duplicate names in one byline keep their first position
            sqlx::query(
                "INSERT INTO paper_authors (paper_id, author_id, author_order) VALUES ($1, $2, $3) \
                 ON CONFLICT (paper_id, author_id) DO NOTHING",
            )
            .bind(paper_id)
            .bind(author_id)
            .bind(order as i32)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    /// Replace a paper's reference links. Unknown ids are inserted as stubs first;
    /// rows that already exist, real or stub, are left alone.
    async fn link_references(
        tx: &mut Transaction<'_, Postgres>,
        paper_id: &str,
        references: &[String],
    ) -> Result<(), ScholarError> {
        sqlx::query("DELETE FROM paper_references WHERE citing_id = $1")
            .bind(paper_id)
            .execute(&mut **tx)
            .await?;
        if references.is_empty() {
            return Ok(());
        }

        let stubs = sqlx::query(
            "INSERT INTO papers (id, is_stub, created_at) \
             SELECT ref_id, TRUE, now() FROM unnest($1::text[]) AS ref_id \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(references)
        .execute(&mut **tx)
        .await?;
        if stubs.rows_affected() > 0 {
            tracing::debug!(paper_id, stubs = stubs.rows_affected(), "Created stub papers for references");
        }

        sqlx::query(
            "INSERT INTO paper_references (citing_id, cited_id, ref_order) \
             SELECT $1, r.ref_id, r.ord::int FROM unnest($2::text[]) WITH ORDINALITY AS r(ref_id, ord) \
             ON CONFLICT (citing_id, cited_id) DO NOTHING",
        )
        .bind(paper_id)
        .bind(references)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

fn row_to_document(row: &PgRow) -> Result<PaperDocument, ScholarError> {
    Ok(PaperDocument {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        abstract_text: row.try_get("abstract")?,
        n_citation: row.try_get("n_citation")?,
    })
}

fn row_to_paper(row: &PgRow) -> Result<Paper, ScholarError> {
    Ok(Paper {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        abstract_text: row.try_get("abstract")?,
        venue: row.try_get("venue")?,
        year: row.try_get("year")?,
        n_citation: row.try_get("n_citation")?,
        doi: row.try_get("doi")?,
        authors: row.try_get("authors")?,
        references: row.try_get("reference_ids")?,
        is_stub: row.try_get("is_stub")?,
        in_chroma: row.try_get("in_chroma")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl PaperStore for PostgresPaperStore {
    async fn list_live_papers(&self) -> Result<Vec<PaperDocument>, ScholarError> {
        let rows = sqlx::query(
            "SELECT id, title, abstract, n_citation FROM papers \
             WHERE NOT is_stub ORDER BY created_at ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_document).collect()
    }

    async fn get_paper(&self, id: &str) -> Result<Paper, ScholarError> {
        let sql = format!("{} WHERE p.id = $1 GROUP BY p.id", PAPER_SELECT);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ScholarError::NotFound { id: id.to_string() })?;
        row_to_paper(&row)
    }

    async fn get_papers(&self, ids: &[String]) -> Result<Vec<Paper>, ScholarError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!("{} WHERE p.id = ANY($1) GROUP BY p.id", PAPER_SELECT);
        let rows = sqlx::query(&sql).bind(ids).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_paper).collect()
    }

    async fn list_papers(&self, page: u32, size: u32) -> Result<PaperPage, ScholarError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM papers WHERE NOT is_stub")
            .fetch_one(&self.pool)
            .await?;

        let sql = format!(
            "{} WHERE NOT p.is_stub GROUP BY p.id \
             ORDER BY p.n_citation DESC, p.year DESC NULLS LAST, p.id ASC LIMIT $1 OFFSET $2",
            PAPER_SELECT
        );
        let rows = sqlx::query(&sql)
            .bind(i64::from(size))
            .bind(PaperPage::offset(page, size) as i64)
            .fetch_all(&self.pool)
            .await?;
        let papers = rows.iter().map(row_to_paper).collect::<Result<Vec<_>, _>>()?;

        Ok(PaperPage::new(papers, total as u64, page, size))
    }

    async fn list_unsynced_papers(&self, limit: usize) -> Result<Vec<PaperDocument>, ScholarError> {
        let rows = sqlx::query(
            "SELECT id, title, abstract, n_citation FROM papers \
             WHERE NOT is_stub AND NOT in_chroma ORDER BY created_at ASC, id ASC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_document).collect()
    }

    async fn mark_in_chroma(&self, ids: &[String]) -> Result<u64, ScholarError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("UPDATE papers SET in_chroma = TRUE WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn upsert_paper(&self, input: CreatePaper) -> Result<Paper, ScholarError> {
        let id = input.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
        let references = dedup_references(input.references.clone());
        let mut tx = self.pool.begin().await?;

        // A stub row for this id is promoted in place; its inbound references survive
        sqlx::query(
            "INSERT INTO papers (id, title, abstract, venue, year, n_citation, doi, is_stub, in_chroma, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, FALSE, $9) \
             ON CONFLICT (id) DO UPDATE SET \
                title = EXCLUDED.title, abstract = EXCLUDED.abstract, venue = EXCLUDED.venue, \
                year = EXCLUDED.year, n_citation = EXCLUDED.n_citation, doi = EXCLUDED.doi, \
                is_stub = EXCLUDED.is_stub, in_chroma = FALSE, updated_at = now()",
        )
        .bind(&id)
        .bind(&input.title)
        .bind(&input.abstract_text)
        .bind(&input.venue)
        .bind(input.year)
        .bind(input.n_citation)
        .bind(&input.doi)
        .bind(input.is_stub)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(|e| ScholarError::Storage(format!("Failed to upsert paper: {}", e)))?;

        Self::link_authors(&mut tx, &id, &input.authors).await?;
        Self::link_references(&mut tx, &id, &references).await?;
        tx.commit().await?;

        self.get_paper(&id).await
    }

    async fn update_paper(&self, id: &str, input: UpdatePaper) -> Result<Paper, ScholarError> {
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query("SELECT id FROM papers WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(ScholarError::NotFound { id: id.to_string() });
        }

        // Build dynamic SET clause with numbered parameters; $1 is updated_at
        let mut param_idx: u32 = 2;
        let mut sets: Vec<String> = vec!["updated_at = $1".to_string()];
        let mut push = |column: &str, present: bool| {
            if present {
                sets.push(format!("{} = ${}", column, param_idx));
                param_idx += 1;
            }
        };
        push("title", input.title.is_some());
        push("abstract", input.abstract_text.is_some());
        push("venue", input.venue.is_some());
        push("year", input.year.is_some());
        push("n_citation", input.n_citation.is_some());
        push("doi", input.doi.is_some());
        push("is_stub", input.is_stub.is_some());
        if input.touches_index_text() {
            sets.push("in_chroma = FALSE".to_string());
        }

        let sql = format!("UPDATE papers SET {} WHERE id = ${}", sets.join(", "), param_idx);

        let mut q = sqlx::query(&sql).bind(Utc::now());
        if let Some(ref title) = input.title {
            q = q.bind(title);
        }
        if let Some(ref abstract_text) = input.abstract_text {
            q = q.bind(abstract_text);
        }
        if let Some(ref venue) = input.venue {
            q = q.bind(venue);
        }
        if let Some(year) = input.year {
            q = q.bind(year);
        }
        if let Some(n_citation) = input.n_citation {
            q = q.bind(n_citation);
        }
        if let Some(ref doi) = input.doi {
            q = q.bind(doi);
        }
        if let Some(is_stub) = input.is_stub {
            q = q.bind(is_stub);
        }
        q.bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| ScholarError::Storage(format!("Failed to update paper: {}", e)))?;

        if let Some(ref authors) = input.authors {
            Self::link_authors(&mut tx, id, authors).await?;
        }
        if let Some(references) = input.references {
            Self::link_references(&mut tx, id, &dedup_references(references)).await?;
        }
        tx.commit().await?;

        self.get_paper(id).await
    }

    async fn delete_paper(&self, id: &str) -> Result<bool, ScholarError> {
        let result = sqlx::query("DELETE FROM papers WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_papers(&self) -> Result<u64, ScholarError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM papers")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}
