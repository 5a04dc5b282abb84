//! Record writes.
//!
//! Messages and notifications are plain inserts. Cases, documents and
//! financial records upsert on `id`, so re-saving a row with a later
//! `updated_at` is what makes it show up as changed.

use rusqlite::params;
use tracing::debug;

use crate::error::Result;
use crate::types::{Case, Document, FinancialRecord, Message, Notification, PortalRecord};

use super::{PortalStore, to_nanos};

impl PortalStore {
    /// Insert a record of any domain.
    pub fn insert(&self, record: &PortalRecord) -> Result<()> {
        match record {
            PortalRecord::Message(r) => self.insert_message(r),
            PortalRecord::Notification(r) => self.insert_notification(r),
            PortalRecord::Case(r) => self.insert_case(r),
            PortalRecord::Document(r) => self.insert_document(r),
            PortalRecord::Financial(r) => self.insert_financial_record(r),
        }
    }

    pub fn insert_message(&self, message: &Message) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO messages (id, tenant_id, case_id, sender, body, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                message.id,
                message.tenant_id.as_str(),
                message.case_id,
                message.sender,
                message.body,
                to_nanos(message.created_at)?,
            ],
        )?;

        debug!(tenant_id = %message.tenant_id, "Inserted message {}", message.id);
        Ok(())
    }

    pub fn insert_notification(&self, notification: &Notification) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO notifications (id, tenant_id, title, body, read, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                notification.id,
                notification.tenant_id.as_str(),
                notification.title,
                notification.body,
                notification.read,
                to_nanos(notification.created_at)?,
            ],
        )?;

        debug!(tenant_id = %notification.tenant_id, "Inserted notification {}", notification.id);
        Ok(())
    }

    /// Insert or update a case.
    pub fn insert_case(&self, case: &Case) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO cases (id, tenant_id, title, status, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                status = excluded.status,
                updated_at = excluded.updated_at
            "#,
            params![
                case.id,
                case.tenant_id.as_str(),
                case.title,
                case.status,
                to_nanos(case.updated_at)?,
            ],
        )?;

        debug!(tenant_id = %case.tenant_id, "Saved case {}", case.id);
        Ok(())
    }

    /// Insert or update a document.
    pub fn insert_document(&self, document: &Document) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO documents (id, tenant_id, case_id, name, content_type, size_bytes, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                case_id = excluded.case_id,
                name = excluded.name,
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                updated_at = excluded.updated_at
            "#,
            params![
                document.id,
                document.tenant_id.as_str(),
                document.case_id,
                document.name,
                document.content_type,
                document.size_bytes,
                to_nanos(document.updated_at)?,
            ],
        )?;

        debug!(tenant_id = %document.tenant_id, "Saved document {}", document.id);
        Ok(())
    }

    /// Insert or update a financial record.
    pub fn insert_financial_record(&self, record: &FinancialRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO financial_records (id, tenant_id, kind, amount_cents, currency, status, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind,
                amount_cents = excluded.amount_cents,
                currency = excluded.currency,
                status = excluded.status,
                updated_at = excluded.updated_at
            "#,
            params![
                record.id,
                record.tenant_id.as_str(),
                record.kind,
                record.amount_cents,
                record.currency,
                record.status,
                to_nanos(record.updated_at)?,
            ],
        )?;

        debug!(tenant_id = %record.tenant_id, "Saved financial record {}", record.id);
        Ok(())
    }
}
