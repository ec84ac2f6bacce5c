//! Device operator database operations.

use rusqlite::{params, ErrorCode, OptionalExtension, Row};
use tracing::warn;

use super::{now_timestamp, Database, DbError, DbResult};
use crate::models::{
    hash_password, normalize_email, verify_password, NewUser, UserRecord, DEFAULT_LANGUAGE,
};

const USER_COLUMNS: &str = r#"
    id, name, email, password_hash, asha_id, phone, supervisor_id,
    territory_state, territory_district, territory_block, territory_village,
    preferred_language, created_at, is_active
"#;

impl Database {
    /// Register a new operator.
    ///
    /// Fails with [`DbError::EmailExists`] when the (lower-cased) email is taken.
    pub fn create_user(&self, user: &NewUser) -> DbResult<UserRecord> {
        let email = normalize_email(&user.email);
        let id = user
            .id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let password_hash =
            hash_password(&user.password).map_err(|e| DbError::PasswordHash(e.to_string()))?;

        let result = self.conn.execute(
            r#"
            INSERT INTO users (
                id, name, email, password_hash, asha_id, phone, supervisor_id,
                territory_state, territory_district, territory_block, territory_village,
                preferred_language, created_at, is_active
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, 1)
            "#,
            params![
                id,
                user.name,
                email,
                password_hash,
                user.asha_id,
                user.phone,
                user.supervisor_id.clone().unwrap_or_default(),
                user.territory_state.clone().unwrap_or_default(),
                user.territory_district.clone().unwrap_or_default(),
                user.territory_block.clone().unwrap_or_default(),
                user.territory_village.clone().unwrap_or_default(),
                user.preferred_language
                    .clone()
                    .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
                now_timestamp(),
            ],
        );

        if let Err(e) = result {
            return Err(map_unique_email(e, &email));
        }

        self.get_user_by_email(&email)?
            .ok_or_else(|| DbError::NotFound(format!("user {}", email)))
    }

    /// Look up an operator by email (case-insensitive).
    pub fn get_user_by_email(&self, email: &str) -> DbResult<Option<UserRecord>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM users WHERE email = ? LIMIT 1", USER_COLUMNS),
                [normalize_email(email)],
                user_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Look up an active operator whose password matches.
    ///
    /// The stored hash is verified in process; a row whose hash cannot be parsed
    /// never matches.
    pub fn get_user_by_credentials(
        &self,
        email: &str,
        password: &str,
    ) -> DbResult<Option<UserRecord>> {
        let user = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM users WHERE email = ? AND is_active = 1 LIMIT 1",
                    USER_COLUMNS
                ),
                [normalize_email(email)],
                user_from_row,
            )
            .optional()?;

        let Some(user) = user else {
            return Ok(None);
        };
        match verify_password(password, &user.password_hash) {
            Ok(true) => Ok(Some(user)),
            Ok(false) => Ok(None),
            Err(e) => {
                warn!(user_id = %user.id, error = %e, "stored password hash is unreadable");
                Ok(None)
            }
        }
    }

    /// List all operators, newest first.
    pub fn list_users(&self) -> DbResult<Vec<UserRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM users ORDER BY created_at DESC",
            USER_COLUMNS
        ))?;
        let rows = stmt.query_map([], user_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Change an operator's UI language.
    pub fn update_user_preferred_language(&self, user_id: &str, language: &str) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "UPDATE users SET preferred_language = ? WHERE id = ?",
            [language, user_id],
        )?;
        Ok(rows_affected > 0)
    }
}

fn map_unique_email(err: rusqlite::Error, email: &str) -> DbError {
    if let rusqlite::Error::SqliteFailure(code, msg) = &err {
        if code.code == ErrorCode::ConstraintViolation {
            let msg = msg.clone().unwrap_or_default();
            if msg.contains("users.email") {
                return DbError::EmailExists(email.to_string());
            }
            return DbError::Constraint(msg);
        }
    }
    DbError::Sqlite(err)
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRecord> {
    let is_active: i64 = row.get(13)?;
    Ok(UserRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        asha_id: row.get(4)?,
        phone: row.get(5)?,
        supervisor_id: row.get(6)?,
        territory_state: row.get(7)?,
        territory_district: row.get(8)?,
        territory_block: row.get(9)?,
        territory_village: row.get(10)?,
        preferred_language: row.get(11)?,
        created_at: row.get(12)?,
        is_active: is_active != 0,
    })
}
