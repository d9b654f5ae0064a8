use color_eyre::{Result, eyre::WrapErr};
use serde::Serialize;
use sqlx::{Pool, Postgres, query_as};

use crate::{db::membership::Role, money::Cents};

/// Outstanding cost per member of one jar, computed in a single grouped query.
/// Pending and disputed offenses are owed; paid and forgiven ones are settled.
const MEMBER_BALANCES: &str = r#"SELECT m.user_id, u.name, u.avatar, m.role,
    COALESCE(SUM(CASE WHEN o.status IN ('pending', 'disputed')
        THEN COALESCE(o.cost_override, t.cost_amount, 0) ELSE 0 END), 0)::BIGINT AS outstanding,
    COUNT(o.id) FILTER (WHERE o.status = 'pending') AS pending_count
FROM jar_membership m
INNER JOIN "user" u ON u.id = m.user_id
LEFT JOIN offense o ON o.jar_id = m.jar_id AND o.offender_id = m.user_id
LEFT JOIN offense_type t ON t.id = o.offense_type_id
WHERE m.jar_id = $1
GROUP BY m.id, m.user_id, u.name, u.avatar, m.role, m.joined
ORDER BY m.joined ASC, m.id ASC"#;

#[derive(sqlx::FromRow, Debug)]
struct MemberBalanceRow {
    user_id: i32,
    name: String,
    avatar: Option<String>,
    role: String,
    outstanding: Cents,
    pending_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemberBalance {
    pub user_id: i32,
    pub name: String,
    pub avatar: Option<String>,
    pub role: Role,
    #[serde(rename = "outstanding_cents")]
    pub outstanding: Cents,
    pub outstanding_display: String,
    pub pending_count: i64,
}

impl TryFrom<MemberBalanceRow> for MemberBalance {
    type Error = color_eyre::Report;

    fn try_from(row: MemberBalanceRow) -> Result<Self> {
        Ok(MemberBalance {
            user_id: row.user_id,
            name: row.name,
            avatar: row.avatar,
            role: row.role.parse()?,
            outstanding: row.outstanding,
            outstanding_display: row.outstanding.to_string(),
            pending_count: row.pending_count,
        })
    }
}

pub async fn member_balances(db: &Pool<Postgres>, jar_id: i32) -> Result<Vec<MemberBalance>> {
    debug!("member balances exec sql: {MEMBER_BALANCES}");
    let rows: Vec<MemberBalanceRow> = query_as(MEMBER_BALANCES)
        .bind(jar_id)
        .fetch_all(db)
        .await
        .wrap_err("member balances")?;
    rows.into_iter().map(MemberBalance::try_from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balance_display_uses_two_decimals() {
        let balance = MemberBalance::try_from(MemberBalanceRow {
            user_id: 1,
            name: "B".to_owned(),
            avatar: None,
            role: "member".to_owned(),
            outstanding: Cents(1250),
            pending_count: 2,
        })
        .unwrap();
        assert_eq!(balance.role, Role::Member);
        let json = serde_json::to_value(&balance).unwrap();
        assert_eq!(json["outstanding_cents"], 1250);
        assert_eq!(json["outstanding_display"], "12.50");
        assert_eq!(json["pending_count"], 2);
        assert_eq!(json["role"], "member");
    }

    #[test]
    fn settled_statuses_are_excluded() {
        assert!(MEMBER_BALANCES.contains("IN ('pending', 'disputed')"));
        assert!(!MEMBER_BALANCES.contains("'paid'"));
        assert!(!MEMBER_BALANCES.contains("'forgiven'"));
    }
}
