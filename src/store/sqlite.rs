//! SQLite-backed [DocumentStore].
//!
//! Documents are kept as JSON bodies next to the columns the secondary indexes filter on.
//! Identifiers, themes and topic types live in side tables so that membership lookups stay
//! indexed. The store owns a current-thread tokio runtime and blocks on every query, matching the
//! synchronous contract of the engine.
use futures_core::future::BoxFuture;
use sqlx::{
    error::BoxDynError,
    migrate::{MigrateDatabase, Migration as SqlxMigration, MigrationSource, Migrator},
    sqlite::{Sqlite, SqliteConnectOptions, SqlitePoolOptions},
    Pool, QueryBuilder, Row,
};
use sqlx::{migrate::MigrationType, Transaction};
use std::{path::PathBuf, str::FromStr};
use tokio::runtime::Runtime;

use super::{next_revision, DocumentStore, IndexQuery};
use crate::{
    document::Document,
    error::TopicStoreError,
    properties::{ConstructId, ConstructKind, Locator, Revision},
};

/// A migration definition.
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub sql: &'static str,
    pub kind: MigrationType,
}

#[derive(Debug, Clone)]
struct MigrationList(Vec<Migration>);

impl MigrationSource<'static> for MigrationList {
    fn resolve(self) -> BoxFuture<'static, Result<Vec<SqlxMigration>, BoxDynError>> {
        Box::pin(async move {
            let mut migrations = Vec::new();
            for migration in self.0 {
                if matches!(migration.kind, MigrationType::ReversibleUp) {
                    migrations.push(SqlxMigration::new(
                        migration.version,
                        migration.description.into(),
                        migration.kind,
                        migration.sql.into(),
                        false,
                    ));
                }
            }
            Ok(migrations)
        })
    }
}

pub async fn db_init(db_path: PathBuf) -> Result<Pool<Sqlite>, sqlx::Error> {
    let fqdb = format!("sqlite:{}", db_path.to_string_lossy());
    tracing::debug!("Initializing topic store db from file: {:?}", fqdb);
    if !Sqlite::database_exists(&fqdb).await.unwrap_or(false) {
        Sqlite::create_database(&fqdb).await?;
    }
    let options = SqliteConnectOptions::from_str(&fqdb)?
        .read_only(false)
        .create_if_missing(true);

    // One writer per topic map: a single connection keeps sqlite from reporting SQLITE_BUSY.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    let migrations = MigrationList(vec![Migration {
        version: 1,
        description: "create_document_tables",
        sql: "\
            CREATE TABLE documents (id TEXT PRIMARY KEY, rev TEXT NOT NULL, topicmap TEXT NOT NULL, kind TEXT NOT NULL, \
                type TEXT, value TEXT, datatype TEXT, parent TEXT, player TEXT, reifier TEXT, scope TEXT NOT NULL, body TEXT NOT NULL); \
            CREATE INDEX documents_by_topicmap ON documents (topicmap, kind); \
            CREATE INDEX documents_by_type ON documents (topicmap, type); \
            CREATE INDEX documents_by_parent ON documents (parent); \
            CREATE INDEX documents_by_player ON documents (player); \
            CREATE TABLE identifiers (id TEXT NOT NULL, topicmap TEXT NOT NULL, locator TEXT NOT NULL); \
            CREATE INDEX identifiers_by_locator ON identifiers (topicmap, locator); \
            CREATE TABLE themes (id TEXT NOT NULL, theme TEXT NOT NULL); \
            CREATE INDEX themes_by_theme ON themes (theme); \
            CREATE TABLE instances (id TEXT NOT NULL, type TEXT NOT NULL); \
            CREATE INDEX instances_by_type ON instances (type);",
        kind: MigrationType::ReversibleUp,
    }]);
    let migrator = Migrator::new(migrations).await?;
    migrator.run(&pool).await?;

    let count_res = sqlx::query("SELECT COUNT(*) FROM documents;")
        .fetch_one(&pool)
        .await?;
    tracing::info!(
        "Topic store DB initialized. Stored document count: {:?}",
        count_res.get::<i64, usize>(0)
    );

    Ok(pool)
}

#[derive(Debug)]
pub struct SqliteStore {
    // Dropped before the runtime that drives it.
    pool: Pool<Sqlite>,
    runtime: Runtime,
    path: PathBuf,
}

impl SqliteStore {
    pub fn open(path: PathBuf) -> Result<Self, TopicStoreError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let pool = runtime.block_on(db_init(path.clone()))?;
        Ok(SqliteStore {
            pool,
            runtime,
            path,
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    async fn current_revision(
        tx: &mut Transaction<'static, Sqlite>,
        id: &ConstructId,
    ) -> Result<Option<Revision>, TopicStoreError> {
        let rev: Option<String> = sqlx::query_scalar("SELECT rev FROM documents WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&mut **tx)
            .await?;
        Ok(rev.map(Revision::from))
    }

    async fn clear_side_tables(
        tx: &mut Transaction<'static, Sqlite>,
        id: &ConstructId,
    ) -> Result<(), TopicStoreError> {
        for table in ["identifiers", "themes", "instances"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE id = ?"))
                .bind(id.to_string())
                .execute(&mut **tx)
                .await?;
        }
        Ok(())
    }

    async fn put_async(
        &self,
        doc: &Document,
        expected: Option<&Revision>,
    ) -> Result<Revision, TopicStoreError> {
        let mut tx = self.pool.begin().await?;
        let actual = Self::current_revision(&mut tx, &doc.id).await?;
        if actual.as_ref() != expected {
            return Err(TopicStoreError::RevisionConflict {
                id: doc.id,
                expected: expected.cloned(),
                actual,
            });
        }
        let rev = next_revision(expected, doc)?;
        let mut stored = doc.clone();
        stored.rev = Some(rev.clone());
        let body = serde_json::to_string(&stored)?;
        let scope = stored
            .scope
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(",");

        sqlx::query(
            "INSERT INTO documents (id, rev, topicmap, kind, type, value, datatype, parent, player, reifier, scope, body) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET rev = excluded.rev, type = excluded.type, value = excluded.value, \
             datatype = excluded.datatype, parent = excluded.parent, player = excluded.player, \
             reifier = excluded.reifier, scope = excluded.scope, body = excluded.body",
        )
        .bind(stored.id.to_string())
        .bind(rev.as_str())
        .bind(stored.topicmap.to_string())
        .bind(stored.documenttype.as_str())
        .bind(stored.r#type.map(|t| t.to_string()))
        .bind(stored.value.clone())
        .bind(stored.datatype.as_ref().map(|d| d.to_string()))
        .bind(stored.parent.map(|p| p.to_string()))
        .bind(stored.player.map(|p| p.to_string()))
        .bind(stored.reifier.map(|r| r.to_string()))
        .bind(scope)
        .bind(body)
        .execute(&mut *tx)
        .await?;

        Self::clear_side_tables(&mut tx, &stored.id).await?;
        for locator in stored
            .itemidentifiers
            .iter()
            .chain(stored.subjectidentifiers.iter())
            .chain(stored.subjectlocators.iter())
        {
            sqlx::query("INSERT INTO identifiers (id, topicmap, locator) VALUES (?, ?, ?)")
                .bind(stored.id.to_string())
                .bind(stored.topicmap.to_string())
                .bind(locator.to_string())
                .execute(&mut *tx)
                .await?;
        }
        for theme in stored.scope.iter() {
            sqlx::query("INSERT INTO themes (id, theme) VALUES (?, ?)")
                .bind(stored.id.to_string())
                .bind(theme.to_string())
                .execute(&mut *tx)
                .await?;
        }
        for r#type in stored.types.iter() {
            sqlx::query("INSERT INTO instances (id, type) VALUES (?, ?)")
                .bind(stored.id.to_string())
                .bind(r#type.to_string())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(rev)
    }

    async fn delete_async(
        &self,
        id: &ConstructId,
        revision: &Revision,
    ) -> Result<(), TopicStoreError> {
        let mut tx = self.pool.begin().await?;
        let actual = Self::current_revision(&mut tx, id).await?;
        if actual.is_none() {
            return Err(TopicStoreError::NotFound(format!("document {id}")));
        }
        if actual.as_ref() != Some(revision) {
            return Err(TopicStoreError::RevisionConflict {
                id: *id,
                expected: Some(revision.clone()),
                actual,
            });
        }
        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        Self::clear_side_tables(&mut tx, id).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn query_async(&self, query: &IndexQuery) -> Result<Vec<Document>, TopicStoreError> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT body FROM documents WHERE topicmap = ");
        qb.push_bind(query.topicmap.to_string());
        if let Some(kind) = query.kind {
            qb.push(" AND kind = ").push_bind(kind.as_str());
        }
        if let Some(r#type) = query.r#type {
            qb.push(" AND type = ").push_bind(r#type.to_string());
        }
        if let Some(scope) = &query.scope {
            let joined = scope
                .iter()
                .map(|t| t.to_string())
                .collect::<Vec<_>>()
                .join(",");
            qb.push(" AND scope = ").push_bind(joined);
        }
        if let Some(value) = &query.value {
            qb.push(" AND value = ").push_bind(value.clone());
        }
        if let Some(datatype) = &query.datatype {
            qb.push(" AND datatype = ").push_bind(datatype.to_string());
        }
        if let Some(parent) = query.parent {
            qb.push(" AND parent = ").push_bind(parent.to_string());
        }
        if let Some(player) = query.player {
            qb.push(" AND player = ").push_bind(player.to_string());
        }
        if let Some(reifier) = query.reifier {
            qb.push(" AND reifier = ").push_bind(reifier.to_string());
        }
        if let Some(theme) = query.theme {
            qb.push(" AND id IN (SELECT id FROM themes WHERE theme = ")
                .push_bind(theme.to_string())
                .push(")");
        }
        if let Some(r#type) = query.instance_of {
            qb.push(" AND id IN (SELECT id FROM instances WHERE type = ")
                .push_bind(r#type.to_string())
                .push(")");
        }
        if let Some(locator) = &query.identifier {
            qb.push(" AND id IN (SELECT id FROM identifiers WHERE locator = ")
                .push_bind(locator.to_string())
                .push(")");
        }
        qb.push(" ORDER BY id");

        let bodies: Vec<String> = qb
            .build_query_scalar()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("[SqliteStore::query] index query failed: {}", e);
                e
            })?;
        bodies
            .iter()
            .map(|body| Ok(serde_json::from_str::<Document>(body)?))
            .collect()
    }
}

impl DocumentStore for SqliteStore {
    fn fetch_by_id(&self, id: &ConstructId) -> Result<Option<Document>, TopicStoreError> {
        let body: Option<String> = self.runtime.block_on(
            sqlx::query_scalar("SELECT body FROM documents WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool),
        )?;
        body.map(|b| Ok(serde_json::from_str(&b)?)).transpose()
    }

    fn fetch_by_identifier(
        &self,
        topicmap: &ConstructId,
        locator: &Locator,
    ) -> Result<Option<Document>, TopicStoreError> {
        let body: Option<String> = self.runtime.block_on(
            sqlx::query_scalar(
                "SELECT d.body FROM documents d JOIN identifiers i ON i.id = d.id \
                 WHERE i.topicmap = ? AND i.locator = ? ORDER BY d.id LIMIT 1",
            )
            .bind(topicmap.to_string())
            .bind(locator.to_string())
            .fetch_optional(&self.pool),
        )?;
        body.map(|b| Ok(serde_json::from_str(&b)?)).transpose()
    }

    fn put(
        &self,
        doc: &Document,
        expected: Option<&Revision>,
    ) -> Result<Revision, TopicStoreError> {
        self.runtime.block_on(self.put_async(doc, expected))
    }

    fn delete(&self, id: &ConstructId, revision: &Revision) -> Result<(), TopicStoreError> {
        self.runtime.block_on(self.delete_async(id, revision))
    }

    fn query(&self, query: &IndexQuery) -> Result<Vec<Document>, TopicStoreError> {
        self.runtime.block_on(self.query_async(query))
    }

    fn topic_maps(&self) -> Result<Vec<Document>, TopicStoreError> {
        let bodies: Vec<String> = self.runtime.block_on(
            sqlx::query_scalar("SELECT body FROM documents WHERE kind = ? ORDER BY id")
                .bind(ConstructKind::TopicMap.as_str())
                .fetch_all(&self.pool),
        )?;
        bodies
            .iter()
            .map(|body| Ok(serde_json::from_str::<Document>(body)?))
            .collect()
    }
}
