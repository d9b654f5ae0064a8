use std::{fmt, str::FromStr};

use chrono::{DateTime, Local};
use color_eyre::{
    Result,
    eyre::{WrapErr, eyre},
};
use sea_query::{
    ColumnDef, Expr, ExprTrait, ForeignKey, ForeignKeyAction, Iden, Index, Order,
    PostgresQueryBuilder,
};
use sea_query_sqlx::SqlxBinder;
use serde::Serialize;
use sqlx::{Executor, Pool, Postgres, query, query_as_with};

use crate::{
    db::{
        is_unique_violation,
        jar::{TipJar, TipJarRow},
        user::User,
    },
    error::AppError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Member,
}

impl Role {
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Member => "member",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = color_eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "admin" => Ok(Role::Admin),
            "member" => Ok(Role::Member),
            other => Err(eyre!("unknown role: {other}")),
        }
    }
}

#[derive(Iden)]
pub enum JarMembership {
    Table,
    Id,
    JarId,
    UserId,
    Role,
    Joined,
}

impl JarMembership {
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
            .col(ColumnDef::new(Self::JarId).integer().not_null())
            .col(ColumnDef::new(Self::UserId).integer().not_null())
            .col(
                ColumnDef::new(Self::Role)
                    .string()
                    .not_null()
                    .default(Role::Member.as_str()),
            )
            .col(
                ColumnDef::new(Self::Joined)
                    .timestamp_with_time_zone()
                    .not_null()
                    .default(Expr::current_timestamp()),
            )
            .foreign_key(
                ForeignKey::create()
                    .name("fk_jar_membership_jar")
                    .from(Self::Table, Self::JarId)
                    .to(TipJar::Table, TipJar::Id)
                    .on_delete(ForeignKeyAction::Cascade),
            )
            .foreign_key(
                ForeignKey::create()
                    .name("fk_jar_membership_user")
                    .from(Self::Table, Self::UserId)
                    .to(User::Table, User::Id),
            )
            .build(PostgresQueryBuilder);
        db.execute(query(&sql)).await.wrap_err("create jar_membership table")?;

        let sql = Index::create()
            .if_not_exists()
            .name("uq_jar_membership_jar_user")
            .table(Self::Table)
            .col(Self::JarId)
            .col(Self::UserId)
            .unique()
            .build(PostgresQueryBuilder);
        db.execute(query(&sql)).await.wrap_err("create jar_membership index")?;
        Ok(())
    }

    pub async fn insert<'e, E>(
        db: E,
        jar_id: i32,
        user_id: i32,
        role: Role,
    ) -> Result<MembershipRow, sqlx::Error>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let (sql, values) = sea_query::Query::insert()
            .into_table(Self::Table)
            .columns([Self::JarId, Self::UserId, Self::Role, Self::Joined])
            .values_panic([
                jar_id.into(),
                user_id.into(),
                role.as_str().into(),
                Expr::current_timestamp(),
            ])
            .returning_all()
            .build_sqlx(PostgresQueryBuilder);
        debug!("insert exec sql: {sql}");
        query_as_with(&sql, values).fetch_one(db).await
    }

    /// Adds the user to the jar behind `invite_code` as a plain member.
    pub async fn join(
        db: &Pool<Postgres>,
        invite_code: &str,
        user_id: i32,
    ) -> Result<TipJarRow, AppError> {
        let jar = TipJar::select_by_invite_code(db, invite_code)
            .await?
            .ok_or_else(|| AppError::not_found("jar"))?;

        if Self::is_member(db, jar.id, user_id).await? {
            return Err(AppError::Conflict(
                "already a member of this jar".to_owned(),
            ));
        }

        Self::insert(db, jar.id, user_id, Role::Member)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppError::Conflict("already a member of this jar".to_owned())
                } else {
                    AppError::storage("insert membership", e)
                }
            })?;

        info!(
            "user joined jar: user_id={user_id} jar_id={} jar_name={}",
            jar.id, jar.name
        );
        Ok(jar)
    }

    pub async fn role_of(db: &Pool<Postgres>, jar_id: i32, user_id: i32) -> Result<Option<Role>> {
        let (sql, values) = sea_query::Query::select()
            .column(Self::Role)
            .from(Self::Table)
            .and_where(Expr::col(Self::JarId).eq(jar_id))
            .and_where(Expr::col(Self::UserId).eq(user_id))
            .build_sqlx(PostgresQueryBuilder);
        let row: Option<(String,)> = query_as_with(&sql, values)
            .fetch_optional(db)
            .await
            .wrap_err("select member role")?;
        row.map(|(role,)| role.parse()).transpose()
    }

    pub async fn is_member(db: &Pool<Postgres>, jar_id: i32, user_id: i32) -> Result<bool> {
        Ok(Self::role_of(db, jar_id, user_id).await?.is_some())
    }

    pub async fn is_admin(db: &Pool<Postgres>, jar_id: i32, user_id: i32) -> Result<bool> {
        Ok(Self::role_of(db, jar_id, user_id).await? == Some(Role::Admin))
    }

    /// Members with their profile, in join order.
    pub async fn list_members(db: &Pool<Postgres>, jar_id: i32) -> Result<Vec<MemberInfo>> {
        let (sql, values) = sea_query::Query::select()
            .columns([
                (Self::Table, Self::Id),
                (Self::Table, Self::UserId),
                (Self::Table, Self::Role),
                (Self::Table, Self::Joined),
            ])
            .columns([
                (User::Table, User::Name),
                (User::Table, User::Email),
                (User::Table, User::Avatar),
            ])
            .from(Self::Table)
            .inner_join(
                User::Table,
                Expr::col((Self::Table, Self::UserId)).equals((User::Table, User::Id)),
            )
            .and_where(Expr::col((Self::Table, Self::JarId)).eq(jar_id))
            .order_by((Self::Table, Self::Joined), Order::Asc)
            .order_by((Self::Table, Self::Id), Order::Asc)
            .build_sqlx(PostgresQueryBuilder);
        debug!("list members exec sql: {sql}");
        let rows: Vec<MemberInfoRow> = query_as_with(&sql, values)
            .fetch_all(db)
            .await
            .wrap_err("list jar members")?;
        rows.into_iter().map(MemberInfo::try_from).collect()
    }
}

#[derive(sqlx::FromRow, Debug, Clone, Serialize)]
pub struct MembershipRow {
    pub id: i32,
    pub jar_id: i32,
    pub user_id: i32,
    pub role: String,
    pub joined: DateTime<Local>,
}

#[derive(sqlx::FromRow, Debug)]
struct MemberInfoRow {
    id: i32,
    user_id: i32,
    role: String,
    joined: DateTime<Local>,
    name: String,
    email: String,
    avatar: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemberInfo {
    pub id: i32,
    pub user_id: i32,
    pub name: String,
    pub email: String,
    pub avatar: Option<String>,
    pub role: Role,
    pub joined: DateTime<Local>,
}

impl TryFrom<MemberInfoRow> for MemberInfo {
    type Error = color_eyre::Report;

    fn try_from(row: MemberInfoRow) -> Result<Self> {
        Ok(MemberInfo {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            email: row.email,
            avatar: row.avatar,
            role: row.role.parse()?,
            joined: row.joined,
        })
    }
}
