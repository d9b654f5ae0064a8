use std::{fmt, str::FromStr};

use chrono::{DateTime, Local};
use color_eyre::{Result, eyre::WrapErr};
use sea_query::{
    ColumnDef, Expr, ExprTrait, ForeignKey, ForeignKeyAction, Iden, Index, PostgresQueryBuilder,
};
use sea_query_sqlx::SqlxBinder;
use serde::Serialize;
use sqlx::{Executor, Pool, Postgres, query, query_as, query_as_with};

use crate::{
    db::{is_foreign_key_violation, jar::TipJar, offense_type::OffenseType, user::User},
    error::AppError,
    money::Cents,
};

pub const RECENT_ACTIVITY_LIMIT: i64 = 10;
pub const DEFAULT_PER_PAGE: u32 = 20;
pub const MAX_PER_PAGE: u32 = 100;
const FALLBACK_UNIT: &str = "items";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OffenseStatus {
    Pending,
    Paid,
    Disputed,
    Forgiven,
}

impl OffenseStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            OffenseStatus::Pending => "pending",
            OffenseStatus::Paid => "paid",
            OffenseStatus::Disputed => "disputed",
            OffenseStatus::Forgiven => "forgiven",
        }
    }

    /// Paid and forgiven offenses no longer count toward a balance.
    pub const fn is_settled(self) -> bool {
        matches!(self, OffenseStatus::Paid | OffenseStatus::Forgiven)
    }
}

impl fmt::Display for OffenseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStatusError(String);

impl fmt::Display for ParseStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown offense status: {}", self.0)
    }
}

impl std::error::Error for ParseStatusError {}

impl FromStr for OffenseStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "pending" => Ok(OffenseStatus::Pending),
            "paid" => Ok(OffenseStatus::Paid),
            "disputed" => Ok(OffenseStatus::Disputed),
            "forgiven" => Ok(OffenseStatus::Forgiven),
            other => Err(ParseStatusError(other.to_owned())),
        }
    }
}

#[derive(Iden)]
pub enum Offense {
    Table,
    Id,
    JarId,
    OffenseTypeId,
    ReporterId,
    OffenderId,
    Notes,
    CostOverride,
    Status,
    Updated,
    Created,
}

impl Offense {
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
            .col(ColumnDef::new(Self::OffenseTypeId).integer().not_null())
            .col(ColumnDef::new(Self::ReporterId).integer().not_null())
            .col(ColumnDef::new(Self::OffenderId).integer().not_null())
            .col(ColumnDef::new(Self::Notes).text().not_null().default(""))
            .col(ColumnDef::new(Self::CostOverride).big_integer())
            .col(
                ColumnDef::new(Self::Status)
                    .string()
                    .not_null()
                    .default(OffenseStatus::Pending.as_str()),
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
                    .name("fk_offense_jar")
                    .from(Self::Table, Self::JarId)
                    .to(TipJar::Table, TipJar::Id)
                    .on_delete(ForeignKeyAction::Cascade),
            )
            .foreign_key(
                ForeignKey::create()
                    .name("fk_offense_type")
                    .from(Self::Table, Self::OffenseTypeId)
                    .to(OffenseType::Table, OffenseType::Id),
            )
            .foreign_key(
                ForeignKey::create()
                    .name("fk_offense_reporter")
                    .from(Self::Table, Self::ReporterId)
                    .to(User::Table, User::Id),
            )
            .foreign_key(
                ForeignKey::create()
                    .name("fk_offense_offender")
                    .from(Self::Table, Self::OffenderId)
                    .to(User::Table, User::Id),
            )
            .build(PostgresQueryBuilder);
        db.execute(query(&sql)).await.wrap_err("create offense table")?;

        let sql = Index::create()
            .if_not_exists()
            .name("idx_offense_jar_offender")
            .table(Self::Table)
            .col(Self::JarId)
            .col(Self::OffenderId)
            .build(PostgresQueryBuilder);
        db.execute(query(&sql)).await.wrap_err("create offense index")?;
        Ok(())
    }

    pub fn build_select() -> sea_query::SelectStatement {
        sea_query::Query::select()
            .columns([
                (Offense::Table, Offense::Id),
                (Offense::Table, Offense::JarId),
                (Offense::Table, Offense::OffenseTypeId),
                (Offense::Table, Offense::ReporterId),
                (Offense::Table, Offense::OffenderId),
                (Offense::Table, Offense::Notes),
                (Offense::Table, Offense::CostOverride),
                (Offense::Table, Offense::Status),
                (Offense::Table, Offense::Updated),
                (Offense::Table, Offense::Created),
            ])
            .from(Offense::Table)
            .take()
    }

    /// Records a new pending offense. Membership of reporter and offender and
    /// ownership of the offense type are checked by the caller.
    pub async fn report(
        db: &Pool<Postgres>,
        new_offense: &NewOffense,
    ) -> Result<OffenseRow, AppError> {
        let (sql, values) = sea_query::Query::insert()
            .into_table(Self::Table)
            .columns([
                Self::JarId,
                Self::OffenseTypeId,
                Self::ReporterId,
                Self::OffenderId,
                Self::Notes,
                Self::CostOverride,
                Self::Status,
                Self::Updated,
                Self::Created,
            ])
            .values([
                new_offense.jar_id.into(),
                new_offense.offense_type_id.into(),
                new_offense.reporter_id.into(),
                new_offense.offender_id.into(),
                new_offense.notes.as_str().into(),
                new_offense.cost_override.map(Cents::get).into(),
                OffenseStatus::Pending.as_str().into(),
                Expr::current_timestamp(),
                Expr::current_timestamp(),
            ])?
            .returning_all()
            .build_sqlx(PostgresQueryBuilder);
        debug!("insert exec sql: {sql}");
        let row: OffenseRow = query_as_with(&sql, values)
            .fetch_one(db)
            .await
            .map_err(|e| {
                if is_foreign_key_violation(&e) {
                    AppError::invalid("offense references an unknown jar, type or user")
                } else {
                    AppError::storage("insert offense", e)
                }
            })?;
        info!(
            "offense reported: id={} jar_id={} reporter_id={} offender_id={}",
            row.id, row.jar_id, row.reporter_id, row.offender_id
        );
        Ok(row)
    }

    /// Overwrites the status. Any status may follow any other.
    pub async fn update_status(
        db: &Pool<Postgres>,
        id: i32,
        status: OffenseStatus,
    ) -> Result<Option<OffenseRow>> {
        let (sql, values) = sea_query::Query::update()
            .table(Self::Table)
            .values([
                (Self::Status, status.as_str().into()),
                (Self::Updated, Expr::current_timestamp()),
            ])
            .and_where(Expr::col(Self::Id).eq(id))
            .returning_all()
            .build_sqlx(PostgresQueryBuilder);
        debug!("update exec sql: {sql}");
        let row: Option<OffenseRow> = query_as_with(&sql, values)
            .fetch_optional(db)
            .await
            .wrap_err("update offense status")?;
        if let Some(row) = &row {
            info!("offense status updated: id={} status={status}", row.id);
        }
        Ok(row)
    }

    pub async fn select_by_id(db: &Pool<Postgres>, id: i32) -> Result<Option<OffenseRow>> {
        let (sql, values) = Self::build_select()
            .and_where(Expr::col((Offense::Table, Offense::Id)).eq(id))
            .build_sqlx(PostgresQueryBuilder);
        let row = query_as_with(&sql, values)
            .fetch_optional(db)
            .await
            .wrap_err("select offense by id")?;
        Ok(row)
    }

    /// Denormalized view of one offense with its type, offender and reporter.
    pub async fn resolve_detail(db: &Pool<Postgres>, id: i32) -> Result<OffenseDetail, AppError> {
        let sql = format!("{DETAIL_SELECT} WHERE o.id = $1");
        let row: Option<OffenseDetailRow> = query_as(&sql)
            .bind(id)
            .fetch_optional(db)
            .await
            .map_err(|e| AppError::storage("resolve offense detail", e))?;
        let row = row.ok_or_else(|| AppError::not_found("offense"))?;
        Ok(OffenseDetail::try_from(row)?)
    }

    /// Newest offenses of a jar, for the activity feed.
    pub async fn list_recent(db: &Pool<Postgres>, jar_id: i32) -> Result<Vec<OffenseDetail>> {
        let sql = format!(
            "{DETAIL_SELECT} WHERE o.jar_id = $1 ORDER BY o.created DESC, o.id DESC LIMIT $2"
        );
        let rows: Vec<OffenseDetailRow> = query_as(&sql)
            .bind(jar_id)
            .bind(RECENT_ACTIVITY_LIMIT)
            .fetch_all(db)
            .await
            .wrap_err("list recent offenses")?;
        rows.into_iter().map(OffenseDetail::try_from).collect()
    }

    /// One page of a jar's ledger, newest first, with the total match count.
    pub async fn list_for_jar(
        db: &Pool<Postgres>,
        jar_id: i32,
        filter: &OffenseFilter,
    ) -> Result<OffensePage> {
        let status = filter.status.map(OffenseStatus::as_str);
        let (limit, offset) = filter.limit_offset();

        let sql = format!(
            "{DETAIL_SELECT} WHERE o.jar_id = $1 {LEDGER_FILTER} \
             ORDER BY o.created DESC, o.id DESC LIMIT $4 OFFSET $5"
        );
        debug!("list offenses exec sql: {sql}");
        let rows: Vec<OffenseDetailRow> = query_as(&sql)
            .bind(jar_id)
            .bind(status)
            .bind(filter.offender_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(db)
            .await
            .wrap_err("list offenses for jar")?;

        let sql = format!("SELECT COUNT(*) FROM offense o WHERE o.jar_id = $1 {LEDGER_FILTER}");
        let (total,): (i64,) = query_as(&sql)
            .bind(jar_id)
            .bind(status)
            .bind(filter.offender_id)
            .fetch_one(db)
            .await
            .wrap_err("count offenses for jar")?;

        Ok(OffensePage {
            offenses: rows
                .into_iter()
                .map(OffenseDetail::try_from)
                .collect::<Result<_>>()?,
            total,
            page: filter.page(),
            per_page: filter.per_page(),
        })
    }
}

const DETAIL_SELECT: &str = r#"SELECT o.id, o.jar_id, o.offense_type_id, o.reporter_id, o.offender_id,
    o.notes, o.cost_override, o.status, o.updated, o.created,
    t.name AS offense_type_name, t.cost_amount AS type_cost_amount,
    t.cost_unit AS type_cost_unit, t.is_active AS offense_type_active,
    offender.name AS offender_name, offender.avatar AS offender_avatar,
    reporter.name AS reporter_name
FROM offense o
INNER JOIN offense_type t ON t.id = o.offense_type_id
INNER JOIN "user" offender ON offender.id = o.offender_id
INNER JOIN "user" reporter ON reporter.id = o.reporter_id"#;

const LEDGER_FILTER: &str =
    "AND ($2::TEXT IS NULL OR o.status = $2::TEXT) AND ($3::INT IS NULL OR o.offender_id = $3::INT)";

#[derive(Debug, Clone)]
pub struct NewOffense {
    pub jar_id: i32,
    pub offense_type_id: i32,
    pub reporter_id: i32,
    pub offender_id: i32,
    pub notes: String,
    pub cost_override: Option<Cents>,
}

#[derive(sqlx::FromRow, Debug, Clone, Serialize)]
pub struct OffenseRow {
    pub id: i32,
    pub jar_id: i32,
    pub offense_type_id: i32,
    pub reporter_id: i32,
    pub offender_id: i32,
    pub notes: String,
    #[serde(rename = "cost_override_cents")]
    pub cost_override: Option<Cents>,
    pub status: String,
    pub updated: DateTime<Local>,
    pub created: DateTime<Local>,
}

impl OffenseRow {
    pub fn status(&self) -> Result<OffenseStatus, ParseStatusError> {
        self.status.parse()
    }
}

#[derive(sqlx::FromRow, Debug)]
struct OffenseDetailRow {
    id: i32,
    jar_id: i32,
    offense_type_id: i32,
    reporter_id: i32,
    offender_id: i32,
    notes: String,
    cost_override: Option<Cents>,
    status: String,
    updated: DateTime<Local>,
    created: DateTime<Local>,
    offense_type_name: String,
    type_cost_amount: Option<Cents>,
    type_cost_unit: Option<String>,
    offense_type_active: bool,
    offender_name: String,
    offender_avatar: Option<String>,
    reporter_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OffenseDetail {
    pub id: i32,
    pub jar_id: i32,
    pub offense_type_id: i32,
    pub offense_type_name: String,
    pub offense_type_active: bool,
    pub reporter_id: i32,
    pub reporter_name: String,
    pub offender_id: i32,
    pub offender_name: String,
    pub offender_avatar: Option<String>,
    pub notes: String,
    #[serde(rename = "cost_override_cents")]
    pub cost_override: Option<Cents>,
    pub status: OffenseStatus,
    pub settled: bool,
    #[serde(rename = "amount_cents")]
    pub amount: Cents,
    pub amount_display: String,
    pub unit: String,
    pub updated: DateTime<Local>,
    pub created: DateTime<Local>,
}

impl TryFrom<OffenseDetailRow> for OffenseDetail {
    type Error = color_eyre::Report;

    fn try_from(row: OffenseDetailRow) -> Result<Self> {
        let status: OffenseStatus = row.status.parse()?;
        let amount = resolve_amount(row.cost_override, row.type_cost_amount);
        Ok(OffenseDetail {
            id: row.id,
            jar_id: row.jar_id,
            offense_type_id: row.offense_type_id,
            offense_type_name: row.offense_type_name,
            offense_type_active: row.offense_type_active,
            reporter_id: row.reporter_id,
            reporter_name: row.reporter_name,
            offender_id: row.offender_id,
            offender_name: row.offender_name,
            offender_avatar: row.offender_avatar,
            notes: row.notes,
            cost_override: row.cost_override,
            status,
            settled: status.is_settled(),
            amount,
            amount_display: amount.to_string(),
            unit: resolve_unit(row.type_cost_unit.as_deref()),
            updated: row.updated,
            created: row.created,
        })
    }
}

/// Override first, then the type's default, then nothing owed.
pub fn resolve_amount(cost_override: Option<Cents>, type_cost: Option<Cents>) -> Cents {
    cost_override.or(type_cost).unwrap_or(Cents::ZERO)
}

pub fn resolve_unit(type_unit: Option<&str>) -> String {
    match type_unit {
        Some(unit) if !unit.trim().is_empty() => unit.to_owned(),
        _ => FALLBACK_UNIT.to_owned(),
    }
}

#[derive(Debug, Clone, Default)]
pub struct OffenseFilter {
    pub status: Option<OffenseStatus>,
    pub offender_id: Option<i32>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl OffenseFilter {
    pub fn page(&self) -> u32 {
        Ord::max(self.page.unwrap_or(1), 1)
    }

    pub fn per_page(&self) -> u32 {
        self.per_page
            .unwrap_or(DEFAULT_PER_PAGE)
            .clamp(1, MAX_PER_PAGE)
    }

    fn limit_offset(&self) -> (i64, i64) {
        let per_page = i64::from(self.per_page());
        (per_page, (i64::from(self.page()) - 1) * per_page)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OffensePage {
    pub offenses: Vec<OffenseDetail>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_prefers_override() {
        assert_eq!(resolve_amount(Some(Cents(250)), Some(Cents(500))), Cents(250));
        assert_eq!(resolve_amount(Some(Cents(0)), Some(Cents(500))), Cents(0));
        assert_eq!(resolve_amount(None, Some(Cents(500))), Cents(500));
        assert_eq!(resolve_amount(None, None), Cents::ZERO);
    }

    #[test]
    fn unit_falls_back_to_items() {
        assert_eq!(resolve_unit(Some("USD")), "USD");
        assert_eq!(resolve_unit(Some("beers")), "beers");
        assert_eq!(resolve_unit(Some("")), "items");
        assert_eq!(resolve_unit(None), "items");
    }

    #[test]
    fn status_parsing() {
        assert_eq!("paid".parse::<OffenseStatus>().unwrap(), OffenseStatus::Paid);
        assert_eq!(
            " forgiven ".parse::<OffenseStatus>().unwrap(),
            OffenseStatus::Forgiven
        );
        let err = "closed".parse::<OffenseStatus>().unwrap_err();
        assert_eq!(err.to_string(), "unknown offense status: closed");
        assert!(!OffenseStatus::Pending.is_settled());
        assert!(!OffenseStatus::Disputed.is_settled());
        assert!(OffenseStatus::Paid.is_settled());
        assert!(OffenseStatus::Forgiven.is_settled());
    }

    #[test]
    fn pagination_is_clamped() {
        let filter = OffenseFilter::default();
        assert_eq!((filter.page(), filter.per_page()), (1, 20));
        assert_eq!(filter.limit_offset(), (20, 0));

        let filter = OffenseFilter {
            page: Some(3),
            per_page: Some(500),
            ..Default::default()
        };
        assert_eq!(filter.per_page(), 100);
        assert_eq!(filter.limit_offset(), (100, 200));

        let filter = OffenseFilter {
            page: Some(0),
            per_page: Some(0),
            ..Default::default()
        };
        assert_eq!(filter.limit_offset(), (1, 0));
    }

    #[test]
    fn detail_resolves_amount_and_unit() {
        let now = Local::now();
        let row = |status: &str| OffenseDetailRow {
            id: 1,
            jar_id: 2,
            offense_type_id: 3,
            reporter_id: 4,
            offender_id: 5,
            notes: String::new(),
            cost_override: None,
            status: status.to_owned(),
            updated: now,
            created: now,
            offense_type_name: "General Offense".to_owned(),
            type_cost_amount: Some(Cents(500)),
            type_cost_unit: None,
            offense_type_active: true,
            offender_name: "B".to_owned(),
            offender_avatar: None,
            reporter_name: "A".to_owned(),
        };
        let detail = OffenseDetail::try_from(row("pending")).unwrap();
        assert_eq!(detail.status, OffenseStatus::Pending);
        assert_eq!(detail.amount, Cents(500));
        assert_eq!(detail.amount_display, "5.00");
        assert_eq!(detail.unit, "items");
        assert!(!detail.settled);

        let json = serde_json::to_value(OffenseDetail::try_from(row("forgiven")).unwrap()).unwrap();
        assert_eq!(json["status"], "forgiven");
        assert_eq!(json["settled"], true);
        assert_eq!(json["amount_cents"], 500);

        assert!(OffenseDetail::try_from(row("closed")).is_err());
    }
}
