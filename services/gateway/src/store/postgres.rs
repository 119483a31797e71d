//! Postgres-backed implementation of the gateway store.
//!
//! # What this module is
//! Implements [`IdentityStore`], [`RoleAssignmentStore`], and [`EventStore`]
//! on Postgres via `sqlx`. It is the durable home of users, cached provider
//! groups, memberships, group-role assignments, and the reconciliation
//! outbox.
//!
//! # Key invariants
//! - Mutations that must emit an outbox row do so inside the same transaction
//!   (`users.role` + `role_change_events`, `group_role_assignments` +
//!   `group_role_change_events`).
//! - A membership sync is one transaction: group upsert, membership inserts,
//!   scoped membership deletes, and the `groups_last_checked` stamp.
//! - Roles are stored as `INTEGER` bit values and decoded with unknown bits
//!   truncated.
//!
//! # Security notes
//! - Database URLs may contain credentials; avoid logging them.
//! - All SQL is static; user input only ever travels through bind parameters.
//!
//! # Operational notes
//! Migrations run at startup via `sqlx::migrate!("./migrations")`.
use super::{
    EventStore, GatewayStore, GroupSync, IdentityStore, RoleAssignmentStore, StoreError,
    StoreResult, UserRoleUpdate,
};
use crate::config::PostgresConfig;
use crate::model::{
    Group, GroupRoleAssignment, GroupRoleChangeEvent, MembershipDiff, RoleChangeEvent, User,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gatehouse_authz::Role;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{FromRow, PgPool};
use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;
use std::time::Duration;

/// Durable gateway store backed by Postgres.
///
/// # Errors
/// - Connection and query failures surface as [`StoreError::Unexpected`].
/// - Unique violations surface as [`StoreError::Conflict`].
///
/// # Example
/// ```rust,no_run
/// use gateway::config::PostgresConfig;
/// use gateway::store::postgres::PostgresStore;
///
/// async fn open(pg: PostgresConfig) {
///     let _ = PostgresStore::connect(&pg).await;
/// }
/// ```
pub struct PostgresStore {
    pool: PgPool,
}

#[derive(Debug, Clone, FromRow)]
struct DbUser {
    id: String,
    username: String,
    email: String,
    role: i32,
    auth_provider_namespace: String,
    auth_provider_name: String,
    provider_user_id: String,
    groups_last_checked: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
struct DbGroup {
    id: String,
    auth_provider_namespace: String,
    auth_provider_name: String,
    name: String,
    icon_url: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
struct DbAssignment {
    group_name: String,
    role: i32,
    description: String,
}

#[derive(Debug, Clone, FromRow)]
struct DbRoleChangeEvent {
    id: i64,
    user_id: String,
    old_role: i32,
    new_role: i32,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
struct DbGroupRoleChangeEvent {
    id: i64,
    group_name: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
struct DbMembership {
    user_id: String,
    group_id: String,
}

const USER_COLUMNS: &str = "id, username, email, role, auth_provider_namespace, \
    auth_provider_name, provider_user_id, groups_last_checked, created_at, updated_at";

impl PostgresStore {
    /// Connect, apply embedded migrations, and return a ready store.
    ///
    /// # Errors
    /// - Connection, migration, or pool setup failures.
    pub async fn connect(pg: &PostgresConfig) -> StoreResult<Self> {
        Self::connect_internal(pg, true).await
    }

    /// Connect without running migrations; for tests that manage the schema.
    #[cfg(any(test, feature = "pg-tests"))]
    pub async fn connect_without_migrations(pg: &PostgresConfig) -> StoreResult<Self> {
        Self::connect_internal(pg, false).await
    }

    async fn connect_internal(pg: &PostgresConfig, run_migrations: bool) -> StoreResult<Self> {
        // Bound both connection setup and pool acquisition so a dead database
        // fails requests instead of hanging them.
        let connect_options = PgConnectOptions::from_str(&pg.url)?;
        let pool = PgPoolOptions::new()
            .max_connections(pg.max_connections)
            .acquire_timeout(Duration::from_millis(pg.acquire_timeout_ms))
            .connect_with(connect_options)
            .await?;

        if run_migrations {
            sqlx::migrate!("./migrations").run(&pool).await?;
        }

        Ok(Self { pool })
    }

    async fn insert_group_event(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        group_name: &str,
    ) -> StoreResult<()> {
        sqlx::query("INSERT INTO group_role_change_events (group_name) VALUES ($1)")
            .bind(group_name)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for PostgresStore {
    async fn get_user(&self, user_id: &str) -> StoreResult<User> {
        let row = sqlx::query_as::<_, DbUser>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(user_from_db)
            .ok_or_else(|| StoreError::NotFound("user".into()))
    }

    async fn find_user_by_identity(
        &self,
        auth_provider_namespace: &str,
        auth_provider_name: &str,
        provider_user_id: &str,
    ) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, DbUser>(&format!(
            "SELECT {USER_COLUMNS} FROM users \
             WHERE auth_provider_namespace = $1 AND auth_provider_name = $2 AND provider_user_id = $3"
        ))
        .bind(auth_provider_namespace)
        .bind(auth_provider_name)
        .bind(provider_user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(user_from_db))
    }

    async fn create_user(&self, user: User) -> StoreResult<User> {
        let mut tx = self.pool.begin().await?;
        let insert = sqlx::query(
            r#"INSERT INTO users (id, username, email, role, auth_provider_namespace,
                   auth_provider_name, provider_user_id, groups_last_checked, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"#,
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(role_to_db(user.role))
        .bind(&user.auth_provider_namespace)
        .bind(&user.auth_provider_name)
        .bind(&user.provider_user_id)
        .bind(user.groups_last_checked)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&mut *tx)
        .await;
        match insert {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                return Err(StoreError::Conflict("user exists".into()));
            }
            Err(err) => return Err(err.into()),
        }
        if user.role.is_privileged() {
            sqlx::query(
                "INSERT INTO role_change_events (user_id, old_role, new_role) VALUES ($1, $2, $3)",
            )
            .bind(&user.id)
            .bind(role_to_db(Role::BASIC))
            .bind(role_to_db(user.role))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(user)
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        let rows = sqlx::query_as::<_, DbUser>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY username, id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(user_from_db).collect())
    }

    async fn update_user_role(&self, user_id: &str, role: Role) -> StoreResult<UserRoleUpdate> {
        let mut tx = self.pool.begin().await?;
        // Lock the row so concurrent updates serialize and each emits an
        // event with the correct `old_role`.
        let row = sqlx::query_as::<_, DbUser>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1 FOR UPDATE"
        ))
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::NotFound("user".into()))?;
        let mut user = user_from_db(row);
        let old_role = user.role;
        if old_role == role {
            tx.commit().await?;
            return Ok(UserRoleUpdate { user, event: None });
        }

        let updated_at: DateTime<Utc> = sqlx::query_scalar(
            "UPDATE users SET role = $2, updated_at = now() WHERE id = $1 RETURNING updated_at",
        )
        .bind(user_id)
        .bind(role_to_db(role))
        .fetch_one(&mut *tx)
        .await?;
        let event = sqlx::query_as::<_, DbRoleChangeEvent>(
            r#"INSERT INTO role_change_events (user_id, old_role, new_role)
               VALUES ($1, $2, $3)
               RETURNING id, user_id, old_role, new_role, created_at"#,
        )
        .bind(user_id)
        .bind(role_to_db(old_role))
        .bind(role_to_db(role))
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        user.role = role;
        user.updated_at = updated_at;
        Ok(UserRoleUpdate {
            user,
            event: Some(role_event_from_db(event)),
        })
    }

    async fn list_groups(
        &self,
        auth_provider_namespace: &str,
        auth_provider_name: &str,
        name_filter: &str,
    ) -> StoreResult<Vec<Group>> {
        // strpos instead of LIKE so `%` and `_` in the filter match literally.
        let rows = sqlx::query_as::<_, DbGroup>(
            r#"SELECT id, auth_provider_namespace, auth_provider_name, name, icon_url
               FROM groups
               WHERE auth_provider_namespace = $1 AND auth_provider_name = $2
                 AND strpos(lower(name), lower($3)) > 0
               ORDER BY name, id"#,
        )
        .bind(auth_provider_namespace)
        .bind(auth_provider_name)
        .bind(name_filter)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(group_from_db).collect())
    }

    async fn list_group_ids_for_user(&self, user_id: &str) -> StoreResult<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT group_id FROM group_memberships WHERE user_id = $1 ORDER BY group_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn list_group_ids_for_users(
        &self,
        user_ids: &[String],
    ) -> StoreResult<HashMap<String, Vec<String>>> {
        if user_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query_as::<_, DbMembership>(
            r#"SELECT user_id, group_id FROM group_memberships
               WHERE user_id = ANY($1) ORDER BY user_id, group_id"#,
        )
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for row in rows {
            map.entry(row.user_id).or_default().push(row.group_id);
        }
        Ok(map)
    }

    async fn list_user_ids_in_group(&self, group_id: &str) -> StoreResult<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT user_id FROM group_memberships WHERE group_id = $1 ORDER BY user_id",
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn sync_user_groups(&self, sync: GroupSync<'_>) -> StoreResult<MembershipDiff> {
        let mut tx = self.pool.begin().await?;

        for group in sync.groups {
            sqlx::query(
                r#"INSERT INTO groups (id, auth_provider_namespace, auth_provider_name, name, icon_url)
                   VALUES ($1, $2, $3, $4, $5)
                   ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, icon_url = EXCLUDED.icon_url"#,
            )
            .bind(&group.id)
            .bind(&group.auth_provider_namespace)
            .bind(&group.auth_provider_name)
            .bind(&group.name)
            .bind(&group.icon_url)
            .execute(&mut *tx)
            .await?;
        }

        let current: BTreeSet<String> = sqlx::query_scalar::<_, String>(
            r#"SELECT gm.group_id FROM group_memberships gm
               JOIN groups g ON g.id = gm.group_id
               WHERE gm.user_id = $1
                 AND g.auth_provider_namespace = $2 AND g.auth_provider_name = $3"#,
        )
        .bind(sync.user_id)
        .bind(sync.auth_provider_namespace)
        .bind(sync.auth_provider_name)
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .collect();
        let reported: BTreeSet<String> = sync.groups.iter().map(|g| g.id.clone()).collect();

        let added: Vec<String> = reported.difference(&current).cloned().collect();
        let removed: Vec<String> = current.difference(&reported).cloned().collect();

        if !added.is_empty() {
            let inserted = sqlx::query(
                r#"INSERT INTO group_memberships (user_id, group_id)
                   SELECT $1, unnest($2::text[])
                   ON CONFLICT DO NOTHING"#,
            )
            .bind(sync.user_id)
            .bind(&added)
            .execute(&mut *tx)
            .await;
            if let Err(err) = inserted {
                if is_foreign_key_violation(&err) {
                    return Err(StoreError::NotFound("user".into()));
                }
                return Err(err.into());
            }
        }
        if !removed.is_empty() {
            sqlx::query("DELETE FROM group_memberships WHERE user_id = $1 AND group_id = ANY($2)")
                .bind(sync.user_id)
                .bind(&removed)
                .execute(&mut *tx)
                .await?;
        }

        let stamped = sqlx::query("UPDATE users SET groups_last_checked = $2 WHERE id = $1")
            .bind(sync.user_id)
            .bind(sync.checked_at)
            .execute(&mut *tx)
            .await?;
        if stamped.rows_affected() == 0 {
            return Err(StoreError::NotFound("user".into()));
        }

        tx.commit().await?;
        Ok(MembershipDiff { added, removed })
    }
}

#[async_trait]
impl RoleAssignmentStore for PostgresStore {
    async fn list_group_role_assignments(&self) -> StoreResult<Vec<GroupRoleAssignment>> {
        let rows = sqlx::query_as::<_, DbAssignment>(
            "SELECT group_name, role, description FROM group_role_assignments ORDER BY group_name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(assignment_from_db).collect())
    }

    async fn get_group_role_assignment(
        &self,
        group_name: &str,
    ) -> StoreResult<GroupRoleAssignment> {
        let row = sqlx::query_as::<_, DbAssignment>(
            "SELECT group_name, role, description FROM group_role_assignments WHERE group_name = $1",
        )
        .bind(group_name)
        .fetch_optional(&self.pool)
        .await?;
        row.map(assignment_from_db)
            .ok_or_else(|| StoreError::NotFound("group role assignment".into()))
    }

    async fn list_group_role_assignments_for_groups(
        &self,
        group_ids: &[String],
    ) -> StoreResult<Vec<GroupRoleAssignment>> {
        if group_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, DbAssignment>(
            r#"SELECT group_name, role, description FROM group_role_assignments
               WHERE group_name = ANY($1)"#,
        )
        .bind(group_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(assignment_from_db).collect())
    }

    async fn create_group_role_assignment(
        &self,
        assignment: GroupRoleAssignment,
    ) -> StoreResult<GroupRoleAssignment> {
        let mut tx = self.pool.begin().await?;
        let insert = sqlx::query(
            "INSERT INTO group_role_assignments (group_name, role, description) VALUES ($1, $2, $3)",
        )
        .bind(&assignment.group_name)
        .bind(role_to_db(assignment.role))
        .bind(&assignment.description)
        .execute(&mut *tx)
        .await;
        if let Err(err) = insert {
            if is_unique_violation(&err) {
                return Err(StoreError::Conflict("group role assignment exists".into()));
            }
            return Err(err.into());
        }
        Self::insert_group_event(&mut tx, &assignment.group_name).await?;
        tx.commit().await?;
        Ok(assignment)
    }

    async fn update_group_role_assignment(
        &self,
        assignment: GroupRoleAssignment,
    ) -> StoreResult<GroupRoleAssignment> {
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            "UPDATE group_role_assignments SET role = $2, description = $3 WHERE group_name = $1",
        )
        .bind(&assignment.group_name)
        .bind(role_to_db(assignment.role))
        .bind(&assignment.description)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound("group role assignment".into()));
        }
        Self::insert_group_event(&mut tx, &assignment.group_name).await?;
        tx.commit().await?;
        Ok(assignment)
    }

    async fn delete_group_role_assignment(&self, group_name: &str) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        let deleted = sqlx::query("DELETE FROM group_role_assignments WHERE group_name = $1")
            .bind(group_name)
            .execute(&mut *tx)
            .await?;
        if deleted.rows_affected() == 0 {
            return Err(StoreError::NotFound("group role assignment".into()));
        }
        Self::insert_group_event(&mut tx, group_name).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl EventStore for PostgresStore {
    async fn record_role_change(
        &self,
        user_id: &str,
        old_role: Role,
        new_role: Role,
    ) -> StoreResult<RoleChangeEvent> {
        let row = sqlx::query_as::<_, DbRoleChangeEvent>(
            r#"INSERT INTO role_change_events (user_id, old_role, new_role)
               VALUES ($1, $2, $3)
               RETURNING id, user_id, old_role, new_role, created_at"#,
        )
        .bind(user_id)
        .bind(role_to_db(old_role))
        .bind(role_to_db(new_role))
        .fetch_one(&self.pool)
        .await?;
        Ok(role_event_from_db(row))
    }

    async fn list_role_change_events_after(
        &self,
        after_id: i64,
        limit: usize,
    ) -> StoreResult<Vec<RoleChangeEvent>> {
        let rows = sqlx::query_as::<_, DbRoleChangeEvent>(
            r#"SELECT id, user_id, old_role, new_role, created_at
               FROM role_change_events WHERE id > $1 ORDER BY id LIMIT $2"#,
        )
        .bind(after_id)
        .bind(limit_to_db(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(role_event_from_db).collect())
    }

    async fn delete_role_change_event(&self, id: i64) -> StoreResult<()> {
        let deleted = sqlx::query("DELETE FROM role_change_events WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if deleted.rows_affected() == 0 {
            return Err(StoreError::NotFound("role change event".into()));
        }
        Ok(())
    }

    async fn list_group_role_change_events_after(
        &self,
        after_id: i64,
        limit: usize,
    ) -> StoreResult<Vec<GroupRoleChangeEvent>> {
        let rows = sqlx::query_as::<_, DbGroupRoleChangeEvent>(
            r#"SELECT id, group_name, created_at
               FROM group_role_change_events WHERE id > $1 ORDER BY id LIMIT $2"#,
        )
        .bind(after_id)
        .bind(limit_to_db(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| GroupRoleChangeEvent {
                id: row.id,
                group_name: row.group_name,
                created_at: row.created_at,
            })
            .collect())
    }

    async fn delete_group_role_change_event(&self, id: i64) -> StoreResult<()> {
        let deleted = sqlx::query("DELETE FROM group_role_change_events WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if deleted.rows_affected() == 0 {
            return Err(StoreError::NotFound("group role change event".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl GatewayStore for PostgresStore {
    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn is_durable(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    has_db_code(err, "23505")
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    has_db_code(err, "23503")
}

fn has_db_code(err: &sqlx::Error, expected: &str) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().map(|code| code == expected).unwrap_or(false);
    }
    false
}

fn role_to_db(role: Role) -> i32 {
    role.bits() as i32
}

fn role_from_db(value: i32) -> Role {
    Role::from_bits_truncate(value as u32)
}

fn limit_to_db(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn user_from_db(row: DbUser) -> User {
    User {
        id: row.id,
        username: row.username,
        email: row.email,
        role: role_from_db(row.role),
        auth_provider_namespace: row.auth_provider_namespace,
        auth_provider_name: row.auth_provider_name,
        provider_user_id: row.provider_user_id,
        groups_last_checked: row.groups_last_checked,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

fn group_from_db(row: DbGroup) -> Group {
    Group {
        id: row.id,
        auth_provider_namespace: row.auth_provider_namespace,
        auth_provider_name: row.auth_provider_name,
        name: row.name,
        icon_url: row.icon_url,
    }
}

fn assignment_from_db(row: DbAssignment) -> GroupRoleAssignment {
    GroupRoleAssignment {
        group_name: row.group_name,
        role: role_from_db(row.role),
        description: row.description,
    }
}

fn role_event_from_db(row: DbRoleChangeEvent) -> RoleChangeEvent {
    RoleChangeEvent {
        id: row.id,
        user_id: row.user_id,
        old_role: role_from_db(row.old_role),
        new_role: role_from_db(row.new_role),
        created_at: row.created_at,
    }
}
