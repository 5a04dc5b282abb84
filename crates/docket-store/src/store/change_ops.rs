//! "Changed after" queries, one per domain.
//!
//! Every query is scoped to one tenant, compares strictly greater than
//! `since`, orders newest first and caps the result at `limit` rows.

use chrono::{DateTime, Utc};
use docket_feed::TenantId;
use rusqlite::{Row, params};

use crate::error::Result;
use crate::types::{Case, Document, FinancialRecord, Message, Notification};

use super::{PortalStore, cursor_nanos, from_nanos};

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

impl PortalStore {
    /// Messages created after `since`.
    pub fn messages_since(
        &self,
        tenant: &TenantId,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Message>> {
        self.query_since(
            r#"
            SELECT id, tenant_id, case_id, sender, body, created_at
            FROM messages
            WHERE tenant_id = ?1 AND created_at > ?2
            ORDER BY created_at DESC, id DESC
            LIMIT ?3
            "#,
            tenant,
            since,
            limit,
            |row| {
                Ok(Message {
                    id: row.get(0)?,
                    tenant_id: TenantId::new(row.get::<_, String>(1)?),
                    case_id: row.get(2)?,
                    sender: row.get(3)?,
                    body: row.get(4)?,
                    created_at: from_nanos(row.get(5)?),
                })
            },
        )
    }

    /// Notifications created after `since`.
    pub fn notifications_since(
        &self,
        tenant: &TenantId,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Notification>> {
        self.query_since(
            r#"
            SELECT id, tenant_id, title, body, read, created_at
            FROM notifications
            WHERE tenant_id = ?1 AND created_at > ?2
            ORDER BY created_at DESC, id DESC
            LIMIT ?3
            "#,
            tenant,
            since,
            limit,
            |row| {
                Ok(Notification {
                    id: row.get(0)?,
                    tenant_id: TenantId::new(row.get::<_, String>(1)?),
                    title: row.get(2)?,
                    body: row.get(3)?,
                    read: row.get(4)?,
                    created_at: from_nanos(row.get(5)?),
                })
            },
        )
    }

    /// Cases updated after `since`.
    pub fn cases_since(
        &self,
        tenant: &TenantId,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Case>> {
        self.query_since(
            r#"
            SELECT id, tenant_id, title, status, updated_at
            FROM cases
            WHERE tenant_id = ?1 AND updated_at > ?2
            ORDER BY updated_at DESC, id DESC
            LIMIT ?3
            "#,
            tenant,
            since,
            limit,
            |row| {
                Ok(Case {
                    id: row.get(0)?,
                    tenant_id: TenantId::new(row.get::<_, String>(1)?),
                    title: row.get(2)?,
                    status: row.get(3)?,
                    updated_at: from_nanos(row.get(4)?),
                })
            },
        )
    }

    /// Documents updated after `since`.
    pub fn documents_since(
        &self,
        tenant: &TenantId,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Document>> {
        self.query_since(
            r#"
            SELECT id, tenant_id, case_id, name, content_type, size_bytes, updated_at
            FROM documents
            WHERE tenant_id = ?1 AND updated_at > ?2
            ORDER BY updated_at DESC, id DESC
            LIMIT ?3
            "#,
            tenant,
            since,
            limit,
            |row| {
                Ok(Document {
                    id: row.get(0)?,
                    tenant_id: TenantId::new(row.get::<_, String>(1)?),
                    case_id: row.get(2)?,
                    name: row.get(3)?,
                    content_type: row.get(4)?,
                    size_bytes: row.get(5)?,
                    updated_at: from_nanos(row.get(6)?),
                })
            },
        )
    }

    /// Financial records updated after `since`.
    pub fn financial_records_since(
        &self,
        tenant: &TenantId,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<FinancialRecord>> {
        self.query_since(
            r#"
            SELECT id, tenant_id, kind, amount_cents, currency, status, updated_at
            FROM financial_records
            WHERE tenant_id = ?1 AND updated_at > ?2
            ORDER BY updated_at DESC, id DESC
            LIMIT ?3
            "#,
            tenant,
            since,
            limit,
            |row| {
                Ok(FinancialRecord {
                    id: row.get(0)?,
                    tenant_id: TenantId::new(row.get::<_, String>(1)?),
                    kind: row.get(2)?,
                    amount_cents: row.get(3)?,
                    currency: row.get(4)?,
                    status: row.get(5)?,
                    updated_at: from_nanos(row.get(6)?),
                })
            },
        )
    }

    fn query_since<T>(
        &self,
        sql: &str,
        tenant: &TenantId,
        since: DateTime<Utc>,
        limit: usize,
        map: impl Fn(&Row<'_>) -> Result<T>,
    ) -> Result<Vec<T>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(sql)?;
        let mut rows = stmt.query(params![
            tenant.as_str(),
            cursor_nanos(since),
            sql_limit(limit)
        ])?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(map(row)?);
        }
        Ok(out)
    }
}
