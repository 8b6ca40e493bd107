//! Postgres 文档库
//!
//! 文档以 JSONB 存在 `reconciler_documents`, `seq` 保留写入顺序。
//! 进程内订阅者在本进程的每次写入后收到最新快照; 其他进程的写入要等下一次本进程写入
//! 或显式 `refresh` 才能看到。

use super::store::{Collection, Document, DocumentStore, Snapshot};
use crate::error::StoreError;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};
use sqlx::types::Json;
use sqlx::PgPool;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS reconciler_documents (
    seq         BIGSERIAL PRIMARY KEY,
    tenant_id   TEXT NOT NULL,
    collection  TEXT NOT NULL,
    id          TEXT NOT NULL,
    body        JSONB NOT NULL,
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (tenant_id, collection, id)
)
"#;

#[derive(Debug, sqlx::FromRow)]
struct DocumentRow {
    id: String,
    body: Json<Map<String, Value>>,
}

pub struct PgStore {
    pool: PgPool,
    chunk_size: usize,
    write_timeout: Duration,
    channels: DashMap<(String, Collection), watch::Sender<Snapshot>>,
}

impl PgStore {
    pub fn new(pool: PgPool, chunk_size: usize, write_timeout: Duration) -> Self {
        Self {
            pool,
            chunk_size: chunk_size.max(1),
            write_timeout,
            channels: DashMap::new(),
        }
    }

    /// 建表 (幂等)
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        self.bounded(sqlx::query(SCHEMA).execute(&self.pool)).await?;
        tracing::info!("reconciler_documents 表已就绪");
        Ok(())
    }

    /// 带超时执行一条语句
    async fn bounded<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.write_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                tracing::error!("✗ 文档库操作超时 (>{}秒)!", self.write_timeout.as_secs());
                Err(StoreError::Timeout(self.write_timeout.as_secs()))
            }
        }
    }

    async fn fetch(&self, tenant: &str, collection: Collection) -> Result<Vec<Document>, StoreError> {
        let rows = self
            .bounded(
                sqlx::query_as::<_, DocumentRow>(
                    r#"
                    SELECT id, body
                    FROM reconciler_documents
                    WHERE tenant_id = $1 AND collection = $2
                    ORDER BY seq
                    "#,
                )
                .bind(tenant)
                .bind(collection.name())
                .fetch_all(&self.pool),
            )
            .await?;
        Ok(rows.into_iter().map(|r| Document::new(r.id, r.body.0)).collect())
    }

    /// 重新读取集合并推送给本进程订阅者
    pub async fn refresh(&self, tenant: &str, collection: Collection) -> Result<(), StoreError> {
        let docs = self.fetch(tenant, collection).await?;
        if let Some(tx) = self.channels.get(&(tenant.to_string(), collection)) {
            tx.send_replace(Arc::new(docs));
        }
        Ok(())
    }

    async fn fetch_body(&self, tenant: &str, collection: Collection, id: &str) -> Result<Map<String, Value>, StoreError> {
        let row = self
            .bounded(
                sqlx::query_as::<_, DocumentRow>(
                    r#"
                    SELECT id, body
                    FROM reconciler_documents
                    WHERE tenant_id = $1 AND collection = $2 AND id = $3
                    "#,
                )
                .bind(tenant)
                .bind(collection.name())
                .bind(id)
                .fetch_optional(&self.pool),
            )
            .await?;
        row.map(|r| r.body.0).ok_or_else(|| StoreError::NotFound {
            collection: collection.name().to_string(),
            id: id.to_string(),
        })
    }

    /// 分块批量插入, 与调用方共用一个事务
    async fn insert_chunks(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        tenant: &str,
        collection: Collection,
        rows: &[(String, Map<String, Value>)],
    ) -> Result<(), StoreError> {
        for (n, chunk) in rows.chunks(self.chunk_size).enumerate() {
            let start = Instant::now();
            let mut query_builder =
                sqlx::QueryBuilder::new("INSERT INTO reconciler_documents (tenant_id, collection, id, body) ");
            query_builder.push_values(chunk, |mut b, (id, body)| {
                b.push_bind(tenant)
                    .push_bind(collection.name())
                    .push_bind(id)
                    .push_bind(Json(body));
            });
            let result = self.bounded(query_builder.build().execute(&mut **tx)).await?;
            tracing::debug!(
                "批次 {} 写入 {} 行, 耗时: {:?}",
                n + 1,
                result.rows_affected(),
                start.elapsed()
            );
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn subscribe(&self, tenant: &str, collection: Collection) -> Result<watch::Receiver<Snapshot>, StoreError> {
        let key = (tenant.to_string(), collection);
        if let Some(tx) = self.channels.get(&key) {
            return Ok(tx.subscribe());
        }
        let docs = self.fetch(tenant, collection).await?;
        let rx = self
            .channels
            .entry(key)
            .or_insert_with(|| watch::channel(Arc::new(docs)).0)
            .subscribe();
        Ok(rx)
    }

    async fn list(&self, tenant: &str, collection: Collection) -> Result<Vec<Document>, StoreError> {
        self.fetch(tenant, collection).await
    }

    async fn add(&self, tenant: &str, collection: Collection, body: Map<String, Value>) -> Result<String, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        self.bounded(
            sqlx::query(
                r#"
                INSERT INTO reconciler_documents (tenant_id, collection, id, body)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(tenant)
            .bind(collection.name())
            .bind(&id)
            .bind(Json(&body))
            .execute(&self.pool),
        )
        .await?;
        self.refresh(tenant, collection).await?;
        Ok(id)
    }

    async fn update(
        &self,
        tenant: &str,
        collection: Collection,
        id: &str,
        patch: Map<String, Value>,
    ) -> Result<(), StoreError> {
        // JSONB || 即浅合并
        let result = self
            .bounded(
                sqlx::query(
                    r#"
                    UPDATE reconciler_documents
                    SET body = body || $4, updated_at = now()
                    WHERE tenant_id = $1 AND collection = $2 AND id = $3
                    "#,
                )
                .bind(tenant)
                .bind(collection.name())
                .bind(id)
                .bind(Json(&patch))
                .execute(&self.pool),
            )
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                collection: collection.name().to_string(),
                id: id.to_string(),
            });
        }
        self.refresh(tenant, collection).await
    }

    async fn delete(&self, tenant: &str, collection: Collection, id: &str) -> Result<(), StoreError> {
        // 先确认存在, 与内存库的 NotFound 语义一致
        self.fetch_body(tenant, collection, id).await?;
        self.bounded(
            sqlx::query(
                r#"
                DELETE FROM reconciler_documents
                WHERE tenant_id = $1 AND collection = $2 AND id = $3
                "#,
            )
            .bind(tenant)
            .bind(collection.name())
            .bind(id)
            .execute(&self.pool),
        )
        .await?;
        self.refresh(tenant, collection).await
    }

    async fn replace_collection(
        &self,
        tenant: &str,
        collection: Collection,
        bodies: Vec<Map<String, Value>>,
    ) -> Result<Vec<String>, StoreError> {
        tracing::info!("覆盖集合 {} ({} 条, 每批 {})", collection, bodies.len(), self.chunk_size);
        let rows: Vec<(String, Map<String, Value>)> = bodies
            .into_iter()
            .map(|body| (uuid::Uuid::new_v4().to_string(), body))
            .collect();

        let mut tx = self.bounded(self.pool.begin()).await?;
        self.bounded(
            sqlx::query("DELETE FROM reconciler_documents WHERE tenant_id = $1 AND collection = $2")
                .bind(tenant)
                .bind(collection.name())
                .execute(&mut *tx),
        )
        .await?;
        self.insert_chunks(&mut tx, tenant, collection, &rows).await?;
        self.bounded(tx.commit()).await?;

        self.refresh(tenant, collection).await?;
        Ok(rows.into_iter().map(|(id, _)| id).collect())
    }
}
