use chrono::{DateTime, Local};
use color_eyre::{Result, eyre::WrapErr};
use sea_query::{
    ColumnDef, Expr, ExprTrait, ForeignKey, ForeignKeyAction, Iden, Order, PostgresQueryBuilder,
};
use sea_query_sqlx::SqlxBinder;
use serde::Serialize;
use sqlx::{Executor, Pool, Postgres, query, query_as_with};

use crate::{
    db::{is_foreign_key_violation, offense::Offense, user::User},
    error::AppError,
    money::Cents,
};

#[derive(Iden)]
pub enum Payment {
    Table,
    Id,
    OffenseId,
    PayerId,
    Amount,
    ProofUrl,
    ProofType,
    Notes,
    Verified,
    VerifiedBy,
    Updated,
    Created,
}

impl Payment {
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
            .col(ColumnDef::new(Self::OffenseId).integer().not_null())
            .col(ColumnDef::new(Self::PayerId).integer().not_null())
            .col(ColumnDef::new(Self::Amount).big_integer())
            .col(ColumnDef::new(Self::ProofUrl).string())
            .col(ColumnDef::new(Self::ProofType).string())
            .col(ColumnDef::new(Self::Notes).text().not_null().default(""))
            .col(
                ColumnDef::new(Self::Verified)
                    .boolean()
                    .not_null()
                    .default(false),
            )
            .col(ColumnDef::new(Self::VerifiedBy).integer())
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
                    .name("fk_payment_offense")
                    .from(Self::Table, Self::OffenseId)
                    .to(Offense::Table, Offense::Id)
                    .on_delete(ForeignKeyAction::Cascade),
            )
            .foreign_key(
                ForeignKey::create()
                    .name("fk_payment_payer")
                    .from(Self::Table, Self::PayerId)
                    .to(User::Table, User::Id),
            )
            .foreign_key(
                ForeignKey::create()
                    .name("fk_payment_verified_by")
                    .from(Self::Table, Self::VerifiedBy)
                    .to(User::Table, User::Id),
            )
            .build(PostgresQueryBuilder);
        db.execute(query(&sql)).await.wrap_err("create payment table")?;
        Ok(())
    }

    pub fn build_select() -> sea_query::SelectStatement {
        sea_query::Query::select()
            .columns([
                (Payment::Table, Payment::Id),
                (Payment::Table, Payment::OffenseId),
                (Payment::Table, Payment::PayerId),
                (Payment::Table, Payment::Amount),
                (Payment::Table, Payment::ProofUrl),
                (Payment::Table, Payment::ProofType),
                (Payment::Table, Payment::Notes),
                (Payment::Table, Payment::Verified),
                (Payment::Table, Payment::VerifiedBy),
                (Payment::Table, Payment::Updated),
                (Payment::Table, Payment::Created),
            ])
            .from(Payment::Table)
            .take()
    }

    /// Stores an unverified payment. The offense status is left alone; settling
    /// is a separate status update.
    pub async fn record(
        db: &Pool<Postgres>,
        new_payment: &NewPayment,
    ) -> Result<PaymentRow, AppError> {
        let (sql, values) = sea_query::Query::insert()
            .into_table(Self::Table)
            .columns([
                Self::OffenseId,
                Self::PayerId,
                Self::Amount,
                Self::ProofUrl,
                Self::ProofType,
                Self::Notes,
                Self::Verified,
                Self::Updated,
                Self::Created,
            ])
            .values([
                new_payment.offense_id.into(),
                new_payment.payer_id.into(),
                new_payment.amount.map(Cents::get).into(),
                new_payment.proof_url.clone().into(),
                new_payment.proof_type.clone().into(),
                new_payment.notes.as_str().into(),
                false.into(),
                Expr::current_timestamp(),
                Expr::current_timestamp(),
            ])?
            .returning_all()
            .build_sqlx(PostgresQueryBuilder);
        debug!("insert exec sql: {sql}");
        let row: PaymentRow = query_as_with(&sql, values)
            .fetch_one(db)
            .await
            .map_err(|e| {
                if is_foreign_key_violation(&e) {
                    AppError::invalid("payment references an unknown offense or user")
                } else {
                    AppError::storage("insert payment", e)
                }
            })?;
        info!(
            "payment recorded: id={} offense_id={} payer_id={}",
            row.id, row.offense_id, row.payer_id
        );
        Ok(row)
    }

    pub async fn verify(
        db: &Pool<Postgres>,
        id: i32,
        verifier_id: i32,
    ) -> Result<Option<PaymentRow>> {
        let (sql, values) = sea_query::Query::update()
            .table(Self::Table)
            .values([
                (Self::Verified, true.into()),
                (Self::VerifiedBy, verifier_id.into()),
                (Self::Updated, Expr::current_timestamp()),
            ])
            .and_where(Expr::col(Self::Id).eq(id))
            .returning_all()
            .build_sqlx(PostgresQueryBuilder);
        debug!("update exec sql: {sql}");
        let row: Option<PaymentRow> = query_as_with(&sql, values)
            .fetch_optional(db)
            .await
            .wrap_err("verify payment")?;
        if row.is_some() {
            info!("payment verified: id={id} verified_by={verifier_id}");
        }
        Ok(row)
    }

    pub async fn select_by_id(db: &Pool<Postgres>, id: i32) -> Result<Option<PaymentRow>> {
        let (sql, values) = Self::build_select()
            .and_where(Expr::col((Payment::Table, Payment::Id)).eq(id))
            .build_sqlx(PostgresQueryBuilder);
        let row = query_as_with(&sql, values)
            .fetch_optional(db)
            .await
            .wrap_err("select payment by id")?;
        Ok(row)
    }

    pub async fn list_for_offense(
        db: &Pool<Postgres>,
        offense_id: i32,
    ) -> Result<Vec<PaymentRow>> {
        let (sql, values) = Self::build_select()
            .and_where(Expr::col((Payment::Table, Payment::OffenseId)).eq(offense_id))
            .order_by((Payment::Table, Payment::Created), Order::Asc)
            .order_by((Payment::Table, Payment::Id), Order::Asc)
            .build_sqlx(PostgresQueryBuilder);
        let rows = query_as_with(&sql, values)
            .fetch_all(db)
            .await
            .wrap_err("list payments for offense")?;
        Ok(rows)
    }
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub offense_id: i32,
    pub payer_id: i32,
    pub amount: Option<Cents>,
    pub proof_url: Option<String>,
    pub proof_type: Option<String>,
    pub notes: String,
}

#[derive(sqlx::FromRow, Debug, Clone, Serialize)]
pub struct PaymentRow {
    pub id: i32,
    pub offense_id: i32,
    pub payer_id: i32,
    #[serde(rename = "amount_cents")]
    pub amount: Option<Cents>,
    pub proof_url: Option<String>,
    pub proof_type: Option<String>,
    pub notes: String,
    pub verified: bool,
    pub verified_by: Option<i32>,
    pub updated: DateTime<Local>,
    pub created: DateTime<Local>,
}
