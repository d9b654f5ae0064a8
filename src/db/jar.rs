use base64::{Engine, engine::general_purpose::URL_SAFE};
use chrono::{DateTime, Local};
use color_eyre::{Result, eyre::WrapErr};
use sea_query::{ColumnDef, Expr, ExprTrait, ForeignKey, Iden, Order, PostgresQueryBuilder};
use sea_query_sqlx::SqlxBinder;
use serde::Serialize;
use sqlx::{Executor, Pool, Postgres, query, query_as_with};

use crate::{
    db::{
        is_unique_violation,
        membership::{JarMembership, Role},
        offense_type::{NewOffenseType, OffenseType},
        user::User,
    },
    error::AppError,
};

pub const INVITE_CODE_LEN: usize = 8;
const GENERATE_ATTEMPTS: usize = 3;

#[derive(Iden)]
pub enum TipJar {
    Table,
    Id,
    Name,
    Description,
    InviteCode,
    CreatedBy,
    Updated,
    Created,
}

impl TipJar {
    pub async fn init(db: &Pool<Postgres>) -> Result<()> {
        let sql = sea_query::Table::create()
            .table(Self::Table)
            .if_not_exists()
            .col(
                ColumnDef::new(Self::Id)
                    .integer()
                    .not_null()
                    .auto_increment()
                    .primary_key(),
            )
            .col(ColumnDef::new(Self::Name).string().not_null())
            .col(ColumnDef::new(Self::Description).string())
            .col(
                ColumnDef::new(Self::InviteCode)
                    .string_len(INVITE_CODE_LEN as u32)
                    .not_null()
                    .unique_key(),
            )
            .col(ColumnDef::new(Self::CreatedBy).integer().not_null())
            .col(
                ColumnDef::new(Self::Updated)
                    .timestamp_with_time_zone()
                    .not_null()
                    .default(Expr::current_timestamp()),
            )
            .col(
                ColumnDef::new(Self::Created)
                    .timestamp_with_time_zone()
                    .not_null()
                    .default(Expr::current_timestamp()),
            )
            .foreign_key(
                ForeignKey::create()
                    .name("fk_tip_jar_created_by")
                    .from(Self::Table, Self::CreatedBy)
                    .to(User::Table, User::Id),
            )
            .build(PostgresQueryBuilder);
        db.execute(query(&sql)).await.wrap_err("create tip_jar table")?;
        Ok(())
    }

    pub fn build_select() -> sea_query::SelectStatement {
        sea_query::Query::select()
            .columns([
                (TipJar::Table, TipJar::Id),
                (TipJar::Table, TipJar::Name),
                (TipJar::Table, TipJar::Description),
                (TipJar::Table, TipJar::InviteCode),
                (TipJar::Table, TipJar::CreatedBy),
                (TipJar::Table, TipJar::Updated),
                (TipJar::Table, TipJar::Created),
            ])
            .from(TipJar::Table)
            .take()
    }

    pub async fn select_by_id(db: &Pool<Postgres>, id: i32) -> Result<Option<TipJarRow>> {
        let (sql, values) = Self::build_select()
            .and_where(Expr::col((TipJar::Table, TipJar::Id)).eq(id))
            .build_sqlx(PostgresQueryBuilder);
        let row = query_as_with(&sql, values)
            .fetch_optional(db)
            .await
            .wrap_err("select jar by id")?;
        Ok(row)
    }

    pub async fn select_by_invite_code(
        db: &Pool<Postgres>,
        invite_code: &str,
    ) -> Result<Option<TipJarRow>> {
        let (sql, values) = Self::build_select()
            .and_where(Expr::col((TipJar::Table, TipJar::InviteCode)).eq(invite_code))
            .build_sqlx(PostgresQueryBuilder);
        let row = query_as_with(&sql, values)
            .fetch_optional(db)
            .await
            .wrap_err("select jar by invite code")?;
        Ok(row)
    }

    /// Jars the user belongs to, in the order they joined them.
    pub async fn list_for_user(db: &Pool<Postgres>, user_id: i32) -> Result<Vec<TipJarRow>> {
        let (sql, values) = Self::build_select()
            .inner_join(
                JarMembership::Table,
                Expr::col((JarMembership::Table, JarMembership::JarId))
                    .equals((TipJar::Table, TipJar::Id)),
            )
            .and_where(Expr::col((JarMembership::Table, JarMembership::UserId)).eq(user_id))
            .order_by((JarMembership::Table, JarMembership::Joined), Order::Asc)
            .order_by((JarMembership::Table, JarMembership::Id), Order::Asc)
            .build_sqlx(PostgresQueryBuilder);
        debug!("list jars exec sql: {sql}");
        let rows = query_as_with(&sql, values)
            .fetch_all(db)
            .await
            .wrap_err("list jars for user")?;
        Ok(rows)
    }

    /// Creates a jar together with the creator's admin membership and the
    /// default offense type. All three rows commit or none do.
    pub async fn create(db: &Pool<Postgres>, new_jar: &NewJar) -> Result<TipJarRow, AppError> {
        if let Some(code) = &new_jar.invite_code {
            validate_invite_code(code)?;
            return Self::create_with_code(db, new_jar, code).await;
        }

        let mut last_err = None;
        for _ in 0..GENERATE_ATTEMPTS {
            let code = generate_invite_code();
            match Self::create_with_code(db, new_jar, &code).await {
                Err(AppError::Conflict(msg)) => {
                    warn!("generated invite code collided, retrying");
                    last_err = Some(AppError::Conflict(msg));
                }
                other => return other,
            }
        }
        Err(last_err.unwrap_or_else(|| AppError::Conflict("invite code already exists".to_owned())))
    }

    async fn create_with_code(
        db: &Pool<Postgres>,
        new_jar: &NewJar,
        invite_code: &str,
    ) -> Result<TipJarRow, AppError> {
        let mut tx = db
            .begin()
            .await
            .map_err(|e| AppError::storage("begin create jar", e))?;

        let (sql, values) = sea_query::Query::insert()
            .into_table(Self::Table)
            .columns([
                Self::Name,
                Self::Description,
                Self::InviteCode,
                Self::CreatedBy,
                Self::Updated,
                Self::Created,
            ])
            .values([
                new_jar.name.as_str().into(),
                new_jar.description.clone().into(),
                invite_code.into(),
                new_jar.creator_id.into(),
                Expr::current_timestamp(),
                Expr::current_timestamp(),
            ])?
            .returning_all()
            .build_sqlx(PostgresQueryBuilder);
        debug!("insert exec sql: {sql}");
        let jar: TipJarRow = query_as_with(&sql, values)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppError::Conflict("invite code already exists".to_owned())
                } else {
                    AppError::storage("insert jar", e)
                }
            })?;

        JarMembership::insert(&mut *tx, jar.id, new_jar.creator_id, Role::Admin)
            .await
            .map_err(|e| AppError::storage("insert creator membership", e))?;

        OffenseType::insert(&mut *tx, &NewOffenseType::general(jar.id))
            .await
            .map_err(|e| AppError::storage("insert default offense type", e))?;

        tx.commit()
            .await
            .map_err(|e| AppError::storage("commit create jar", e))?;

        info!(
            "tip jar created: id={} name={} created_by={}",
            jar.id, jar.name, jar.created_by
        );
        Ok(jar)
    }
}

#[derive(Debug, Clone)]
pub struct NewJar {
    pub name: String,
    pub description: Option<String>,
    pub invite_code: Option<String>,
    pub creator_id: i32,
}

#[derive(sqlx::FromRow, Debug, Clone, Serialize)]
pub struct TipJarRow {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    pub invite_code: String,
    pub created_by: i32,
    pub updated: DateTime<Local>,
    pub created: DateTime<Local>,
}

/// Eight characters of URL-safe base64 over six random bytes.
pub fn generate_invite_code() -> String {
    let bytes: [u8; 6] = rand::random();
    URL_SAFE.encode(bytes)
}

pub fn validate_invite_code(code: &str) -> Result<(), AppError> {
    if code.chars().count() != INVITE_CODE_LEN {
        return Err(AppError::invalid("invite code must be 8 characters"));
    }
    if !code
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(AppError::invalid(
            "invite code may only contain letters, digits, '-' and '_'",
        ));
    }
    Ok(())
}
