use super::{Db, models::ChatTurn};
use crate::llm::Role;
use chrono::Utc;
use rusqlite::{Result, params};

impl Db {
    pub fn append_chat(&self, contract_id: &str, role: Role, message: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO chats (contract_id, role, message, created_at) VALUES (?, ?, ?, ?)",
            params![contract_id, role.as_str(), message, Utc::now()],
        )?;
        Ok(())
    }

    /// The last `limit` turns of a conversation, oldest first.
    pub fn recent_chats(&self, contract_id: &str, limit: usize) -> Result<Vec<ChatTurn>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT role, message, created_at FROM (
                SELECT id, role, message, created_at FROM chats
                WHERE contract_id = ?
                ORDER BY id DESC
                LIMIT ?
            ) ORDER BY id ASC
            "#,
        )?;

        let rows = stmt.query_map(params![contract_id, limit as i64], |row| {
            let role: String = row.get(0)?;
            let role = Role::parse(&role).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    format!("unknown chat role: {role}").into(),
                )
            })?;
            Ok(ChatTurn {
                role,
                message: row.get(1)?,
                created_at: row.get(2)?,
            })
        })?;
        rows.collect()
    }
}
