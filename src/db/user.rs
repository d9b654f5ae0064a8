use chrono::{DateTime, Local};
use color_eyre::{Result, eyre::WrapErr};
use sea_query::{ColumnDef, Expr, ExprTrait, Iden, OnConflict, PostgresQueryBuilder};
use sea_query_sqlx::SqlxBinder;
use serde::Serialize;
use sqlx::{Executor, Pool, Postgres, query, query_as_with};

#[derive(Iden)]
pub enum User {
    Table,
    Id,
    GoogleId,
    Email,
    Name,
    Avatar,
    Updated,
    Created,
}

impl User {
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
            .col(ColumnDef::new(Self::GoogleId).string().not_null().unique_key())
            .col(ColumnDef::new(Self::Email).string().not_null())
            .col(ColumnDef::new(Self::Name).string().not_null())
            .col(ColumnDef::new(Self::Avatar).string())
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
            .build(PostgresQueryBuilder);
        db.execute(query(&sql)).await.wrap_err("create user table")?;
        Ok(())
    }

    pub fn build_select() -> sea_query::SelectStatement {
        sea_query::Query::select()
            .columns([
                (User::Table, User::Id),
                (User::Table, User::GoogleId),
                (User::Table, User::Email),
                (User::Table, User::Name),
                (User::Table, User::Avatar),
                (User::Table, User::Updated),
                (User::Table, User::Created),
            ])
            .from(User::Table)
            .take()
    }

    pub async fn select_by_id(db: &Pool<Postgres>, id: i32) -> Result<Option<UserRow>> {
        let (sql, values) = Self::build_select()
            .and_where(Expr::col((User::Table, User::Id)).eq(id))
            .build_sqlx(PostgresQueryBuilder);
        let row = query_as_with(&sql, values)
            .fetch_optional(db)
            .await
            .wrap_err("select user by id")?;
        Ok(row)
    }

    pub async fn select_by_google_id(
        db: &Pool<Postgres>,
        google_id: &str,
    ) -> Result<Option<UserRow>> {
        let (sql, values) = Self::build_select()
            .and_where(Expr::col((User::Table, User::GoogleId)).eq(google_id))
            .build_sqlx(PostgresQueryBuilder);
        let row = query_as_with(&sql, values)
            .fetch_optional(db)
            .await
            .wrap_err("select user by google id")?;
        Ok(row)
    }

    /// Creates the account for a first login. A concurrent first login for the
    /// same identity resolves to the same row.
    pub async fn insert(db: &Pool<Postgres>, identity: &NewUser) -> Result<UserRow> {
        let avatar = Some(identity.avatar.clone()).filter(|a| !a.is_empty());
        let (sql, values) = sea_query::Query::insert()
            .into_table(Self::Table)
            .columns([
                Self::GoogleId,
                Self::Email,
                Self::Name,
                Self::Avatar,
                Self::Updated,
                Self::Created,
            ])
            .values([
                identity.google_id.as_str().into(),
                identity.email.as_str().into(),
                identity.name.as_str().into(),
                avatar.into(),
                Expr::current_timestamp(),
                Expr::current_timestamp(),
            ])?
            .on_conflict(
                OnConflict::column(Self::GoogleId)
                    .update_columns([Self::Email])
                    .to_owned(),
            )
            .returning_all()
            .build_sqlx(PostgresQueryBuilder);
        debug!("insert exec sql: {sql}");
        let row = query_as_with(&sql, values).fetch_one(db).await.wrap_err("insert user")?;
        Ok(row)
    }

    pub async fn update_profile(
        db: &Pool<Postgres>,
        id: i32,
        name: &str,
        avatar: Option<&str>,
    ) -> Result<Option<UserRow>> {
        let (sql, values) = sea_query::Query::update()
            .table(Self::Table)
            .values([
                (Self::Name, name.into()),
                (
                    Self::Avatar,
                    avatar.filter(|a| !a.is_empty()).map(str::to_owned).into(),
                ),
                (Self::Updated, Expr::current_timestamp()),
            ])
            .and_where(Expr::col(Self::Id).eq(id))
            .returning_all()
            .build_sqlx(PostgresQueryBuilder);
        debug!("update exec sql: {sql}");
        let row = query_as_with(&sql, values)
            .fetch_optional(db)
            .await
            .wrap_err("update user profile")?;
        Ok(row)
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub google_id: String,
    pub email: String,
    pub name: String,
    pub avatar: String,
}

#[derive(sqlx::FromRow, Debug, Clone, Serialize)]
pub struct UserRow {
    pub id: i32,
    #[serde(skip)]
    pub google_id: String,
    pub email: String,
    pub name: String,
    pub avatar: Option<String>,
    pub updated: DateTime<Local>,
    pub created: DateTime<Local>,
}
