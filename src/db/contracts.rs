use super::{Db, models::*};
use chrono::Utc;
use rusqlite::{OptionalExtension, Result, params};

const CONTRACT_COLUMNS: &str =
    "id, file_name, file_path, status, raw_text, report, failure_reason, created_at, updated_at";

fn map_contract_row(row: &rusqlite::Row<'_>) -> Result<ContractRecord> {
    let status: String = row.get(3)?;
    let status = ContractStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown contract status: {status}").into(),
        )
    })?;

    let report: Option<String> = row.get(5)?;
    let report = match report {
        Some(text) => Some(serde_json::from_str(&text).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?),
        None => None,
    };

    Ok(ContractRecord {
        id: row.get(0)?,
        file_name: row.get(1)?,
        file_path: row.get(2)?,
        status,
        raw_text: row.get(4)?,
        report,
        failure_reason: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

impl Db {
    pub fn insert_contract(&self, id: &str, file_name: &str, file_path: &str) -> Result<()> {
        let now = Utc::now();
        self.conn.execute(
            r#"
            INSERT INTO contracts (id, file_name, file_path, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
            params![id, file_name, file_path, ContractStatus::Pending.as_str(), now, now],
        )?;
        Ok(())
    }

    pub fn get_contract(&self, id: &str) -> Result<Option<ContractRecord>> {
        self.conn
            .query_row(
                &format!("SELECT {CONTRACT_COLUMNS} FROM contracts WHERE id = ?"),
                params![id],
                map_contract_row,
            )
            .optional()
    }

    /// Most recently created first.
    pub fn list_contracts(&self, limit: usize) -> Result<Vec<ContractRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CONTRACT_COLUMNS} FROM contracts ORDER BY created_at DESC, id LIMIT ?"
        ))?;
        let rows = stmt.query_map(params![limit as i64], map_contract_row)?;
        rows.collect()
    }

    /// Returns `false` when the contract does not exist.
    pub fn set_contract_status(&self, id: &str, status: ContractStatus) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE contracts SET status = ?, updated_at = ? WHERE id = ?",
            params![status.as_str(), Utc::now(), id],
        )?;
        Ok(changed > 0)
    }

    pub fn set_contract_text(&self, id: &str, raw_text: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE contracts SET raw_text = ?, updated_at = ? WHERE id = ?",
            params![raw_text, Utc::now(), id],
        )?;
        Ok(())
    }

    /// Stores the report and moves the contract to `DONE` in one statement.
    pub fn complete_contract(&self, id: &str, report: &serde_json::Value) -> Result<()> {
        self.conn.execute(
            "UPDATE contracts SET status = ?, report = ?, failure_reason = NULL, updated_at = ? WHERE id = ?",
            params![ContractStatus::Done.as_str(), report.to_string(), Utc::now(), id],
        )?;
        Ok(())
    }

    /// Moves the contract to `FAILED` or `CANCELLED`, clearing any report.
    pub fn abort_contract(&self, id: &str, status: ContractStatus, reason: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE contracts SET status = ?, report = NULL, failure_reason = ?, updated_at = ? WHERE id = ?",
            params![status.as_str(), reason, Utc::now(), id],
        )?;
        Ok(())
    }
}
