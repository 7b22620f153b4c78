use chrono::Utc;
use miette::Diagnostic;
use sea_orm::{
    ConnectionTrait, Database, DatabaseConnection, DatabaseTransaction, DbBackend, QueryResult,
    Statement, TransactionTrait,
};
use thiserror::Error;

use crate::gid::{IdError, PrefixedId};
use crate::settings::Database as DbCfg;

#[derive(Debug, Error, Diagnostic)]
pub enum StorageError {
    #[error("database error: {0}")]
    #[diagnostic(code(warden::storage::db))]
    Db(#[from] sea_orm::DbErr),

    #[error("{kind} `{id}` not found")]
    #[diagnostic(code(warden::storage::not_found))]
    NotFound { kind: &'static str, id: String },

    #[error("{0}")]
    #[diagnostic(code(warden::storage::conflict))]
    Conflict(String),

    #[error("invalid stored id: {0}")]
    #[diagnostic(code(warden::storage::bad_id))]
    BadId(#[from] IdError),
}

/// Role metadata as persisted. Actions live in the relation engine; this row
/// is the source of truth for the name and audit columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleRow {
    pub id: PrefixedId,
    pub name: String,
    pub resource_id: PrefixedId,
    pub created_by: PrefixedId,
    pub updated_by: PrefixedId,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleBindingRow {
    pub id: PrefixedId,
    pub role_id: PrefixedId,
    pub resource_id: PrefixedId,
    pub created_by: PrefixedId,
    pub updated_by: PrefixedId,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Handle on the relational store. Mutations run inside a transaction the
/// caller scopes with [`Storage::begin`]; reads may use the plain connection.
#[derive(Clone)]
pub struct Storage {
    db: DatabaseConnection,
}

impl Storage {
    pub async fn init(cfg: &DbCfg) -> Result<Self, StorageError> {
        let db = Database::connect(&cfg.url).await?;

        db.execute(Statement::from_string(
            DbBackend::Sqlite,
            "PRAGMA foreign_keys = ON",
        ))
        .await?;

        db.execute(Statement::from_string(
            DbBackend::Sqlite,
            r#"
            CREATE TABLE IF NOT EXISTS roles (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                resource_id TEXT NOT NULL,
                created_by TEXT NOT NULL,
                updated_by TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE(resource_id, name)
            )
            "#,
        ))
        .await?;

        db.execute(Statement::from_string(
            DbBackend::Sqlite,
            "CREATE INDEX IF NOT EXISTS idx_roles_resource ON roles(resource_id)",
        ))
        .await?;

        db.execute(Statement::from_string(
            DbBackend::Sqlite,
            r#"
            CREATE TABLE IF NOT EXISTS role_bindings (
                id TEXT PRIMARY KEY,
                role_id TEXT NOT NULL,
                resource_id TEXT NOT NULL,
                created_by TEXT NOT NULL,
                updated_by TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE(resource_id, role_id)
            )
            "#,
        ))
        .await?;

        db.execute(Statement::from_string(
            DbBackend::Sqlite,
            "CREATE INDEX IF NOT EXISTS idx_role_bindings_resource ON role_bindings(resource_id)",
        ))
        .await?;

        Ok(Self { db })
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    pub async fn begin(&self) -> Result<DatabaseTransaction, StorageError> {
        Ok(self.db.begin().await?)
    }

    pub async fn create_role<C: ConnectionTrait>(
        &self,
        conn: &C,
        actor: &PrefixedId,
        role_id: &PrefixedId,
        name: &str,
        resource_id: &PrefixedId,
    ) -> Result<RoleRow, StorageError> {
        let now = Utc::now().timestamp();

        conn.execute(Statement::from_sql_and_values(
            DbBackend::Sqlite,
            r#"INSERT INTO roles (id, name, resource_id, created_by, updated_by, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
            [
                role_id.as_str().into(),
                name.into(),
                resource_id.as_str().into(),
                actor.as_str().into(),
                actor.as_str().into(),
                now.into(),
                now.into(),
            ],
        ))
        .await
        .map_err(map_unique_violation)?;

        Ok(RoleRow {
            id: role_id.clone(),
            name: name.to_string(),
            resource_id: resource_id.clone(),
            created_by: actor.clone(),
            updated_by: actor.clone(),
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn get_role_by_id<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &PrefixedId,
    ) -> Result<RoleRow, StorageError> {
        let row = conn
            .query_one(Statement::from_sql_and_values(
                DbBackend::Sqlite,
                r#"SELECT id, name, resource_id, created_by, updated_by, created_at, updated_at
                   FROM roles WHERE id = ?"#,
                [id.as_str().into()],
            ))
            .await?
            .ok_or_else(|| StorageError::NotFound {
                kind: "role",
                id: id.to_string(),
            })?;

        role_from_row(&row)
    }

    pub async fn list_resource_roles<C: ConnectionTrait>(
        &self,
        conn: &C,
        resource_id: &PrefixedId,
    ) -> Result<Vec<RoleRow>, StorageError> {
        let rows = conn
            .query_all(Statement::from_sql_and_values(
                DbBackend::Sqlite,
                r#"SELECT id, name, resource_id, created_by, updated_by, created_at, updated_at
                   FROM roles WHERE resource_id = ? ORDER BY created_at, id"#,
                [resource_id.as_str().into()],
            ))
            .await?;

        rows.iter().map(role_from_row).collect()
    }

    pub async fn delete_role<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &PrefixedId,
    ) -> Result<(), StorageError> {
        let result = conn
            .execute(Statement::from_sql_and_values(
                DbBackend::Sqlite,
                "DELETE FROM roles WHERE id = ?",
                [id.as_str().into()],
            ))
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound {
                kind: "role",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    pub async fn create_role_binding<C: ConnectionTrait>(
        &self,
        conn: &C,
        actor: &PrefixedId,
        binding_id: &PrefixedId,
        role_id: &PrefixedId,
        resource_id: &PrefixedId,
    ) -> Result<RoleBindingRow, StorageError> {
        let now = Utc::now().timestamp();

        conn.execute(Statement::from_sql_and_values(
            DbBackend::Sqlite,
            r#"INSERT INTO role_bindings (id, role_id, resource_id, created_by, updated_by, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
            [
                binding_id.as_str().into(),
                role_id.as_str().into(),
                resource_id.as_str().into(),
                actor.as_str().into(),
                actor.as_str().into(),
                now.into(),
                now.into(),
            ],
        ))
        .await
        .map_err(map_unique_violation)?;

        Ok(RoleBindingRow {
            id: binding_id.clone(),
            role_id: role_id.clone(),
            resource_id: resource_id.clone(),
            created_by: actor.clone(),
            updated_by: actor.clone(),
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn get_role_binding<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &PrefixedId,
    ) -> Result<RoleBindingRow, StorageError> {
        let row = conn
            .query_one(Statement::from_sql_and_values(
                DbBackend::Sqlite,
                r#"SELECT id, role_id, resource_id, created_by, updated_by, created_at, updated_at
                   FROM role_bindings WHERE id = ?"#,
                [id.as_str().into()],
            ))
            .await?
            .ok_or_else(|| StorageError::NotFound {
                kind: "role binding",
                id: id.to_string(),
            })?;

        binding_from_row(&row)
    }

    pub async fn list_resource_role_bindings<C: ConnectionTrait>(
        &self,
        conn: &C,
        resource_id: &PrefixedId,
    ) -> Result<Vec<RoleBindingRow>, StorageError> {
        let rows = conn
            .query_all(Statement::from_sql_and_values(
                DbBackend::Sqlite,
                r#"SELECT id, role_id, resource_id, created_by, updated_by, created_at, updated_at
                   FROM role_bindings WHERE resource_id = ? ORDER BY created_at, id"#,
                [resource_id.as_str().into()],
            ))
            .await?;

        rows.iter().map(binding_from_row).collect()
    }

    /// Bump the audit columns; the subject diff itself lives in the relation
    /// engine.
    pub async fn touch_role_binding<C: ConnectionTrait>(
        &self,
        conn: &C,
        actor: &PrefixedId,
        id: &PrefixedId,
    ) -> Result<RoleBindingRow, StorageError> {
        let now = Utc::now().timestamp();

        let result = conn
            .execute(Statement::from_sql_and_values(
                DbBackend::Sqlite,
                "UPDATE role_bindings SET updated_by = ?, updated_at = ? WHERE id = ?",
                [actor.as_str().into(), now.into(), id.as_str().into()],
            ))
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound {
                kind: "role binding",
                id: id.to_string(),
            });
        }

        self.get_role_binding(conn, id).await
    }

    /// Returns the number of rows removed; deleting a missing binding is not
    /// an error.
    pub async fn delete_role_binding<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &PrefixedId,
    ) -> Result<u64, StorageError> {
        let result = conn
            .execute(Statement::from_sql_and_values(
                DbBackend::Sqlite,
                "DELETE FROM role_bindings WHERE id = ?",
                [id.as_str().into()],
            ))
            .await?;
        Ok(result.rows_affected())
    }
}

fn map_unique_violation(err: sea_orm::DbErr) -> StorageError {
    let message = err.to_string();
    if message.contains("UNIQUE constraint") {
        StorageError::Conflict(message)
    } else {
        StorageError::Db(err)
    }
}

fn role_from_row(row: &QueryResult) -> Result<RoleRow, StorageError> {
    let id: String = row.try_get("", "id")?;
    let name: String = row.try_get("", "name")?;
    let resource_id: String = row.try_get("", "resource_id")?;
    let created_by: String = row.try_get("", "created_by")?;
    let updated_by: String = row.try_get("", "updated_by")?;
    let created_at: i64 = row.try_get("", "created_at")?;
    let updated_at: i64 = row.try_get("", "updated_at")?;

    Ok(RoleRow {
        id: PrefixedId::parse(&id)?,
        name,
        resource_id: PrefixedId::parse(&resource_id)?,
        created_by: PrefixedId::parse(&created_by)?,
        updated_by: PrefixedId::parse(&updated_by)?,
        created_at,
        updated_at,
    })
}

fn binding_from_row(row: &QueryResult) -> Result<RoleBindingRow, StorageError> {
    let id: String = row.try_get("", "id")?;
    let role_id: String = row.try_get("", "role_id")?;
    let resource_id: String = row.try_get("", "resource_id")?;
    let created_by: String = row.try_get("", "created_by")?;
    let updated_by: String = row.try_get("", "updated_by")?;
    let created_at: i64 = row.try_get("", "created_at")?;
    let updated_at: i64 = row.try_get("", "updated_at")?;

    Ok(RoleBindingRow {
        id: PrefixedId::parse(&id)?,
        role_id: PrefixedId::parse(&role_id)?,
        resource_id: PrefixedId::parse(&resource_id)?,
        created_by: PrefixedId::parse(&created_by)?,
        updated_by: PrefixedId::parse(&updated_by)?,
        created_at,
        updated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_storage() -> (Storage, tempfile::NamedTempFile) {
        let temp = tempfile::NamedTempFile::new().expect("temp file");
        let cfg = DbCfg {
            url: format!("sqlite://{}?mode=rwc", temp.path().display()),
        };
        let storage = Storage::init(&cfg).await.expect("storage init");
        (storage, temp)
    }

    fn id(prefix: &str) -> PrefixedId {
        PrefixedId::new(prefix).unwrap()
    }

    #[tokio::test]
    async fn test_role_round_trip() {
        let (storage, _temp) = test_storage().await;
        let actor = id("idntusr");
        let tenant = id("tnntten");
        let role_id = id("permrv2");

        let txn = storage.begin().await.unwrap();
        let created = storage
            .create_role(&txn, &actor, &role_id, "admin", &tenant)
            .await
            .unwrap();
        txn.commit().await.unwrap();

        let fetched = storage
            .get_role_by_id(storage.connection(), &role_id)
            .await
            .unwrap();
        assert_eq!(fetched, created);

        let listed = storage
            .list_resource_roles(storage.connection(), &tenant)
            .await
            .unwrap();
        assert_eq!(listed, vec![created]);
    }

    #[tokio::test]
    async fn test_role_name_conflict() {
        let (storage, _temp) = test_storage().await;
        let actor = id("idntusr");
        let tenant = id("tnntten");

        let txn = storage.begin().await.unwrap();
        storage
            .create_role(&txn, &actor, &id("permrv2"), "admin", &tenant)
            .await
            .unwrap();
        txn.commit().await.unwrap();

        let txn = storage.begin().await.unwrap();
        let err = storage
            .create_role(&txn, &actor, &id("permrv2"), "admin", &tenant)
            .await
            .unwrap_err();
        txn.rollback().await.unwrap();
        assert!(matches!(err, StorageError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_rollback_discards_role() {
        let (storage, _temp) = test_storage().await;
        let actor = id("idntusr");
        let tenant = id("tnntten");
        let role_id = id("permrv2");

        let txn = storage.begin().await.unwrap();
        storage
            .create_role(&txn, &actor, &role_id, "viewer", &tenant)
            .await
            .unwrap();
        txn.rollback().await.unwrap();

        let err = storage
            .get_role_by_id(storage.connection(), &role_id)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_binding_lifecycle() {
        let (storage, _temp) = test_storage().await;
        let actor = id("idntusr");
        let tenant = id("tnntten");
        let role_id = id("permrv2");
        let binding_id = id("permrbn");

        let txn = storage.begin().await.unwrap();
        storage
            .create_role_binding(&txn, &actor, &binding_id, &role_id, &tenant)
            .await
            .unwrap();
        txn.commit().await.unwrap();

        let other = id("idntusr");
        let touched = storage
            .touch_role_binding(storage.connection(), &other, &binding_id)
            .await
            .unwrap();
        assert_eq!(touched.updated_by, other);
        assert_eq!(touched.created_by, actor);

        assert_eq!(
            storage
                .delete_role_binding(storage.connection(), &binding_id)
                .await
                .unwrap(),
            1
        );
        // idempotent
        assert_eq!(
            storage
                .delete_role_binding(storage.connection(), &binding_id)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_binding_uniqueness_per_resource_and_role() {
        let (storage, _temp) = test_storage().await;
        let actor = id("idntusr");
        let tenant = id("tnntten");
        let role_id = id("permrv2");

        let txn = storage.begin().await.unwrap();
        storage
            .create_role_binding(&txn, &actor, &id("permrbn"), &role_id, &tenant)
            .await
            .unwrap();
        let err = storage
            .create_role_binding(&txn, &actor, &id("permrbn"), &role_id, &tenant)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }
}
