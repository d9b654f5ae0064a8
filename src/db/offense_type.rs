use chrono::{DateTime, Local};
use color_eyre::{Result, eyre::WrapErr};
use sea_query::{
    ColumnDef, Expr, ExprTrait, ForeignKey, ForeignKeyAction, Iden, Order, PostgresQueryBuilder,
};
use sea_query_sqlx::SqlxBinder;
use serde::Serialize;
use sqlx::{Executor, Pool, Postgres, query, query_as_with};

use crate::{db::jar::TipJar, money::Cents};

pub const DEFAULT_TYPE_NAME: &str = "General Offense";
pub const DEFAULT_TYPE_DESCRIPTION: &str = "A general offense for any rule breaking";
pub const DEFAULT_TYPE_COST: Cents = Cents(500);
pub const DEFAULT_TYPE_UNIT: &str = "USD";

#[derive(Iden)]
pub enum OffenseType {
    Table,
    Id,
    JarId,
    Name,
    Description,
    CostAmount,
    CostUnit,
    IsActive,
    Updated,
    Created,
}

impl OffenseType {
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
            .col(ColumnDef::new(Self::Name).string().not_null())
            .col(ColumnDef::new(Self::Description).string())
            .col(ColumnDef::new(Self::CostAmount).big_integer())
            .col(ColumnDef::new(Self::CostUnit).string())
            .col(
                ColumnDef::new(Self::IsActive)
                    .boolean()
                    .not_null()
                    .default(true),
            )
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
                    .name("fk_offense_type_jar")
                    .from(Self::Table, Self::JarId)
                    .to(TipJar::Table, TipJar::Id)
                    .on_delete(ForeignKeyAction::Cascade),
            )
            .build(PostgresQueryBuilder);
        db.execute(query(&sql)).await.wrap_err("create offense_type table")?;
        Ok(())
    }

    pub fn build_select() -> sea_query::SelectStatement {
        sea_query::Query::select()
            .columns([
                (OffenseType::Table, OffenseType::Id),
                (OffenseType::Table, OffenseType::JarId),
                (OffenseType::Table, OffenseType::Name),
                (OffenseType::Table, OffenseType::Description),
                (OffenseType::Table, OffenseType::CostAmount),
                (OffenseType::Table, OffenseType::CostUnit),
                (OffenseType::Table, OffenseType::IsActive),
                (OffenseType::Table, OffenseType::Updated),
                (OffenseType::Table, OffenseType::Created),
            ])
            .from(OffenseType::Table)
            .take()
    }

    pub async fn insert<'e, E>(
        db: E,
        new_type: &NewOffenseType,
    ) -> Result<OffenseTypeRow, sqlx::Error>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let (sql, values) = sea_query::Query::insert()
            .into_table(Self::Table)
            .columns([
                Self::JarId,
                Self::Name,
                Self::Description,
                Self::CostAmount,
                Self::CostUnit,
                Self::IsActive,
                Self::Updated,
                Self::Created,
            ])
            .values_panic([
                new_type.jar_id.into(),
                new_type.name.as_str().into(),
                new_type.description.clone().into(),
                new_type.cost_amount.map(Cents::get).into(),
                new_type.cost_unit.clone().into(),
                true.into(),
                Expr::current_timestamp(),
                Expr::current_timestamp(),
            ])
            .returning_all()
            .build_sqlx(PostgresQueryBuilder);
        debug!("insert exec sql: {sql}");
        query_as_with(&sql, values).fetch_one(db).await
    }

    /// Replaces every mutable field. The owning jar never changes.
    pub async fn update(
        db: &Pool<Postgres>,
        id: i32,
        fields: &OffenseTypeFields,
    ) -> Result<Option<OffenseTypeRow>> {
        let (sql, values) = sea_query::Query::update()
            .table(Self::Table)
            .values([
                (Self::Name, fields.name.as_str().into()),
                (Self::Description, fields.description.clone().into()),
                (Self::CostAmount, fields.cost_amount.map(Cents::get).into()),
                (Self::CostUnit, fields.cost_unit.clone().into()),
                (Self::Updated, Expr::current_timestamp()),
            ])
            .and_where(Expr::col(Self::Id).eq(id))
            .returning_all()
            .build_sqlx(PostgresQueryBuilder);
        debug!("update exec sql: {sql}");
        let row = query_as_with(&sql, values)
            .fetch_optional(db)
            .await
            .wrap_err("update offense type")?;
        Ok(row)
    }

    pub async fn set_active(
        db: &Pool<Postgres>,
        id: i32,
        active: bool,
    ) -> Result<Option<OffenseTypeRow>> {
        let (sql, values) = sea_query::Query::update()
            .table(Self::Table)
            .values([
                (Self::IsActive, active.into()),
                (Self::Updated, Expr::current_timestamp()),
            ])
            .and_where(Expr::col(Self::Id).eq(id))
            .returning_all()
            .build_sqlx(PostgresQueryBuilder);
        let row = query_as_with(&sql, values)
            .fetch_optional(db)
            .await
            .wrap_err("set offense type active")?;
        Ok(row)
    }

    pub async fn select_by_id(db: &Pool<Postgres>, id: i32) -> Result<Option<OffenseTypeRow>> {
        let (sql, values) = Self::build_select()
            .and_where(Expr::col((OffenseType::Table, OffenseType::Id)).eq(id))
            .build_sqlx(PostgresQueryBuilder);
        let row = query_as_with(&sql, values)
            .fetch_optional(db)
            .await
            .wrap_err("select offense type by id")?;
        Ok(row)
    }

    /// Types offered when reporting a new offense.
    pub async fn list_active(db: &Pool<Postgres>, jar_id: i32) -> Result<Vec<OffenseTypeRow>> {
        let (sql, values) = Self::list_query(jar_id, true).build_sqlx(PostgresQueryBuilder);
        let rows = query_as_with(&sql, values)
            .fetch_all(db)
            .await
            .wrap_err("list active offense types")?;
        Ok(rows)
    }

    pub async fn list_all(db: &Pool<Postgres>, jar_id: i32) -> Result<Vec<OffenseTypeRow>> {
        let (sql, values) = Self::list_query(jar_id, false).build_sqlx(PostgresQueryBuilder);
        let rows = query_as_with(&sql, values).fetch_all(db).await.wrap_err("list offense types")?;
        Ok(rows)
    }

    fn list_query(jar_id: i32, active_only: bool) -> sea_query::SelectStatement {
        let mut select = Self::build_select();
        select.and_where(Expr::col((OffenseType::Table, OffenseType::JarId)).eq(jar_id));
        if active_only {
            select.and_where(Expr::col((OffenseType::Table, OffenseType::IsActive)).eq(true));
        }
        select
            .order_by((OffenseType::Table, OffenseType::Name), Order::Asc)
            .order_by((OffenseType::Table, OffenseType::Id), Order::Asc)
            .take()
    }
}

#[derive(Debug, Clone)]
pub struct OffenseTypeFields {
    pub name: String,
    pub description: Option<String>,
    pub cost_amount: Option<Cents>,
    pub cost_unit: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewOffenseType {
    pub jar_id: i32,
    pub name: String,
    pub description: Option<String>,
    pub cost_amount: Option<Cents>,
    pub cost_unit: Option<String>,
}

impl NewOffenseType {
    pub fn new(jar_id: i32, fields: OffenseTypeFields) -> Self {
        NewOffenseType {
            jar_id,
            name: fields.name,
            description: fields.description,
            cost_amount: fields.cost_amount,
            cost_unit: fields.cost_unit,
        }
    }

    /// The type every jar starts with.
    pub fn general(jar_id: i32) -> Self {
        NewOffenseType {
            jar_id,
            name: DEFAULT_TYPE_NAME.to_owned(),
            description: Some(DEFAULT_TYPE_DESCRIPTION.to_owned()),
            cost_amount: Some(DEFAULT_TYPE_COST),
            cost_unit: Some(DEFAULT_TYPE_UNIT.to_owned()),
        }
    }
}

#[derive(sqlx::FromRow, Debug, Clone, Serialize)]
pub struct OffenseTypeRow {
    pub id: i32,
    pub jar_id: i32,
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "cost_amount_cents")]
    pub cost_amount: Option<Cents>,
    pub cost_unit: Option<String>,
    pub is_active: bool,
    pub updated: DateTime<Local>,
    pub created: DateTime<Local>,
}
