use color_eyre::Result;
use sqlx::{Pool, Postgres};

pub(crate) mod balance;
pub(crate) mod jar;
pub(crate) mod membership;
pub(crate) mod offense;
pub(crate) mod offense_type;
pub(crate) mod payment;
pub(crate) mod user;

/// Creates or upgrades every table, parents before children.
pub async fn init(db: &Pool<Postgres>) -> Result<()> {
    user::User::init(db).await?;
    jar::TipJar::init(db).await?;
    membership::JarMembership::init(db).await?;
    offense_type::OffenseType::init(db).await?;
    offense::Offense::init(db).await?;
    payment::Payment::init(db).await?;
    Ok(())
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(e) if e.is_unique_violation())
}

pub(crate) fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(e) if e.is_foreign_key_violation())
}
