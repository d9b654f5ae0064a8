use std::sync::{Arc, Once};

use color_eyre::eyre::WrapErr;
use common_x::restful::axum::{
    Json, body,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::{Value, json};
use sqlx::{Pool, Postgres, postgres::PgPoolOptions, query, query_as};
use tokio::sync::OnceCell;

use crate::{
    AppView,
    api::{
        self, auth::CurrentUser, jar::JoinJarBody, offense::StatusBody, payment::PayBody,
    },
    config::AppConfig,
    db::{
        self,
        balance::member_balances,
        jar::{INVITE_CODE_LEN, NewJar, TipJar},
        membership::{JarMembership, Role},
        offense::{NewOffense, Offense, OffenseFilter, OffenseStatus},
        offense_type::{NewOffenseType, OffenseType, OffenseTypeFields},
        payment::{NewPayment, Payment},
        user::{NewUser, User, UserRow},
    },
    error::AppError,
    money::{AmountInput, Cents},
    oauth::{GoogleAuth, generate_state},
    session::SessionService,
};

const OFFICE_CODE: &str = "ABCD1234";

static LOG: Once = Once::new();
static SCHEMA: OnceCell<()> = OnceCell::const_new();

/// Pool against the scratch database named by `TIPJAR_TEST_DB`. These tests
/// are ignored by default; run them with `cargo test -- --ignored`.
async fn connect() -> Result<Pool<Postgres>, AppError> {
    LOG.call_once(|| common_x::log::init_log_filter("info"));
    let url = std::env::var("TIPJAR_TEST_DB").wrap_err("TIPJAR_TEST_DB is not set")?;

    let db = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await?;
    SCHEMA
        .get_or_try_init(|| async { db::init(&db).await })
        .await?;
    Ok(db)
}

fn app_state(db: &Pool<Postgres>) -> AppView {
    AppView {
        db: db.clone(),
        session: SessionService::new("test-secret"),
        google: GoogleAuth::new("", "", "http://localhost:8080/auth/callback"),
        config: Arc::new(AppConfig::default()),
    }
}

fn signed_in(user: &UserRow) -> CurrentUser {
    CurrentUser { user: user.clone() }
}

/// Status and `data` payload of a handler result.
async fn respond(result: impl IntoResponse) -> Result<(StatusCode, Value), AppError> {
    let response = result.into_response();
    let status = response.status();
    let bytes = body::to_bytes(response.into_body(), usize::MAX).await?;
    let mut json: Value = serde_json::from_slice(&bytes)?;
    let data = json.get_mut("data").map(Value::take).unwrap_or(json);
    Ok((status, data))
}

async fn new_user(db: &Pool<Postgres>, name: &str) -> Result<UserRow, AppError> {
    let user = User::insert(
        db,
        &NewUser {
            google_id: format!("test-{}", generate_state()),
            email: format!("{name}@example.com"),
            name: name.to_owned(),
            avatar: String::new(),
        },
    )
    .await?;
    Ok(user)
}

async fn new_jar(db: &Pool<Postgres>, name: &str, creator: &UserRow) -> Result<i32, AppError> {
    let jar = TipJar::create(
        db,
        &NewJar {
            name: name.to_owned(),
            description: None,
            invite_code: None,
            creator_id: creator.id,
        },
    )
    .await?;
    Ok(jar.id)
}

#[tokio::test]
#[ignore = "needs TIPJAR_TEST_DB"]
async fn office_scenario() -> Result<(), AppError> {
    let db = connect().await?;
    query("DELETE FROM tip_jar WHERE invite_code = $1")
        .bind(OFFICE_CODE)
        .execute(&db)
        .await?;

    let alice = new_user(&db, "alice").await?;
    let bob = new_user(&db, "bob").await?;

    let jar = TipJar::create(
        &db,
        &NewJar {
            name: "Office".to_owned(),
            description: Some("coffee rules".to_owned()),
            invite_code: Some(OFFICE_CODE.to_owned()),
            creator_id: alice.id,
        },
    )
    .await?;
    assert_eq!(jar.invite_code, OFFICE_CODE);
    assert_eq!(
        JarMembership::role_of(&db, jar.id, alice.id).await?,
        Some(Role::Admin)
    );
    assert_eq!(OffenseType::list_all(&db, jar.id).await?.len(), 1);

    assert!(!JarMembership::is_member(&db, jar.id, bob.id).await?);
    JarMembership::join(&db, OFFICE_CODE, bob.id).await?;
    assert!(JarMembership::is_member(&db, jar.id, bob.id).await?);
    assert!(!JarMembership::is_admin(&db, jar.id, bob.id).await?);
    assert!(matches!(
        JarMembership::join(&db, OFFICE_CODE, bob.id).await,
        Err(AppError::Conflict(_))
    ));

    let duplicate = TipJar::create(
        &db,
        &NewJar {
            name: "Office 2".to_owned(),
            description: None,
            invite_code: Some(OFFICE_CODE.to_owned()),
            creator_id: bob.id,
        },
    )
    .await;
    assert!(matches!(duplicate, Err(AppError::Conflict(_))));
    let (count,): (i64,) = query_as("SELECT COUNT(*) FROM tip_jar WHERE invite_code = $1")
        .bind(OFFICE_CODE)
        .fetch_one(&db)
        .await?;
    assert_eq!(count, 1);
    assert_eq!(TipJar::list_for_user(&db, bob.id).await?.len(), 1);

    let general = OffenseType::list_active(&db, jar.id).await?.remove(0);
    let offense = Offense::report(
        &db,
        &NewOffense {
            jar_id: jar.id,
            offense_type_id: general.id,
            reporter_id: alice.id,
            offender_id: bob.id,
            notes: "late to standup".to_owned(),
            cost_override: None,
        },
    )
    .await?;
    assert_eq!(offense.status()?, OffenseStatus::Pending);

    let detail = Offense::resolve_detail(&db, offense.id).await?;
    assert_eq!(detail.amount, Cents(500));
    assert_eq!(detail.unit, "USD");
    assert_eq!(detail.offender_name, "bob");
    assert_eq!(detail.reporter_name, "alice");

    let balances = member_balances(&db, jar.id).await?;
    assert_eq!(balances.len(), 2);
    assert_eq!(balances[0].user_id, alice.id);
    assert_eq!(balances[0].outstanding, Cents::ZERO);
    assert_eq!(balances[1].user_id, bob.id);
    assert_eq!(balances[1].outstanding, Cents(500));
    assert_eq!(balances[1].pending_count, 1);

    let payment = Payment::record(
        &db,
        &NewPayment {
            offense_id: offense.id,
            payer_id: bob.id,
            amount: Some(Cents(500)),
            proof_url: Some("/uploads/receipt.png".to_owned()),
            proof_type: Some("image".to_owned()),
            notes: String::new(),
        },
    )
    .await?;
    assert!(!payment.verified);
    let still_pending = Offense::resolve_detail(&db, offense.id).await?;
    assert_eq!(still_pending.status, OffenseStatus::Pending);

    let verified = Payment::verify(&db, payment.id, alice.id)
        .await?
        .ok_or_else(|| AppError::not_found("payment"))?;
    assert!(verified.verified);
    assert_eq!(verified.verified_by, Some(alice.id));
    assert_eq!(Payment::list_for_offense(&db, offense.id).await?.len(), 1);
    assert_eq!(
        Offense::resolve_detail(&db, offense.id).await?.status,
        OffenseStatus::Pending
    );

    let paid = Offense::update_status(&db, offense.id, OffenseStatus::Paid)
        .await?
        .ok_or_else(|| AppError::not_found("offense"))?;
    assert_eq!(paid.status()?, OffenseStatus::Paid);

    let balances = member_balances(&db, jar.id).await?;
    assert_eq!(balances[1].outstanding, Cents::ZERO);
    assert_eq!(balances[1].pending_count, 0);
    Ok(())
}

#[tokio::test]
#[ignore = "needs TIPJAR_TEST_DB"]
async fn generated_codes_and_unknown_invites() -> Result<(), AppError> {
    let db = connect().await?;
    let carol = new_user(&db, "carol").await?;
    let jar_id = new_jar(&db, "Band", &carol).await?;
    let jar = TipJar::select_by_id(&db, jar_id)
        .await?
        .ok_or_else(|| AppError::not_found("jar"))?;
    assert_eq!(jar.invite_code.len(), INVITE_CODE_LEN);

    assert!(matches!(
        JarMembership::join(&db, "zzzzzzzz", carol.id).await,
        Err(AppError::NotFound(_))
    ));
    assert!(!JarMembership::is_member(&db, jar_id + 1_000_000, carol.id).await?);
    assert!(matches!(
        Offense::resolve_detail(&db, i32::MAX).await,
        Err(AppError::NotFound(_))
    ));
    Ok(())
}

#[tokio::test]
#[ignore = "needs TIPJAR_TEST_DB"]
async fn overrides_units_and_settlement_states() -> Result<(), AppError> {
    let db = connect().await?;
    let dave = new_user(&db, "dave").await?;
    let erin = new_user(&db, "erin").await?;
    let jar_id = new_jar(&db, "Flat", &dave).await?;
    let jar = TipJar::select_by_id(&db, jar_id)
        .await?
        .ok_or_else(|| AppError::not_found("jar"))?;
    JarMembership::join(&db, &jar.invite_code, erin.id).await?;
    let (dave_id, erin_id) = (dave.id, erin.id);

    let dishes = OffenseType::insert(
        &db,
        &NewOffenseType::new(
            jar_id,
            OffenseTypeFields {
                name: "Dishes".to_owned(),
                description: None,
                cost_amount: None,
                cost_unit: None,
            },
        ),
    )
    .await?;

    let report = |type_id: i32, cost_override: Option<Cents>| {
        let db = db.clone();
        async move {
            Offense::report(
                &db,
                &NewOffense {
                    jar_id,
                    offense_type_id: type_id,
                    reporter_id: dave_id,
                    offender_id: erin_id,
                    notes: String::new(),
                    cost_override,
                },
            )
            .await
        }
    };

    let free = report(dishes.id, None).await?;
    let detail = Offense::resolve_detail(&db, free.id).await?;
    assert_eq!(detail.amount, Cents::ZERO);
    assert_eq!(detail.unit, "items");

    let overridden = report(dishes.id, Some(Cents(325))).await?;
    assert_eq!(
        Offense::resolve_detail(&db, overridden.id).await?.amount,
        Cents(325)
    );

    let general = OffenseType::list_active(&db, jar_id)
        .await?
        .into_iter()
        .find(|t| t.name == "General Offense")
        .ok_or_else(|| AppError::not_found("offense type"))?;
    let disputed = report(general.id, None).await?;
    Offense::update_status(&db, disputed.id, OffenseStatus::Disputed).await?;
    let forgiven = report(general.id, Some(Cents(1000))).await?;
    Offense::update_status(&db, forgiven.id, OffenseStatus::Forgiven).await?;

    // pending 0 + pending 3.25 + disputed 5.00; forgiven excluded
    let balances = member_balances(&db, jar_id).await?;
    let erin_balance = balances
        .iter()
        .find(|b| b.user_id == erin_id)
        .ok_or_else(|| AppError::not_found("balance"))?;
    assert_eq!(erin_balance.outstanding, Cents(825));
    assert_eq!(erin_balance.pending_count, 2);

    // any status may follow any other
    Offense::update_status(&db, forgiven.id, OffenseStatus::Pending).await?;
    let page = Offense::list_for_jar(
        &db,
        jar_id,
        &OffenseFilter {
            status: Some(OffenseStatus::Pending),
            per_page: Some(2),
            ..Default::default()
        },
    )
    .await?;
    assert_eq!(page.total, 3);
    assert_eq!(page.offenses.len(), 2);
    assert_eq!(page.offenses[0].id, forgiven.id);

    OffenseType::set_active(&db, dishes.id, false).await?;
    assert_eq!(OffenseType::list_active(&db, jar_id).await?.len(), 1);
    assert_eq!(OffenseType::list_all(&db, jar_id).await?.len(), 2);
    assert!(
        !Offense::resolve_detail(&db, free.id)
            .await?
            .offense_type_active
    );
    Ok(())
}

async fn report_as(
    state: &AppView,
    user: &UserRow,
    jar_id: i32,
    body: Value,
) -> Result<(StatusCode, Value), AppError> {
    let body = serde_json::from_value(body)?;
    let result = api::offense::report(
        State(state.clone()),
        signed_in(user),
        Path(jar_id),
        Json(body),
    )
    .await;
    respond(result).await
}

async fn set_status_as(
    state: &AppView,
    user: &UserRow,
    offense_id: i32,
    status: &str,
) -> Result<StatusCode, AppError> {
    let result = api::offense::update_status(
        State(state.clone()),
        signed_in(user),
        Path(offense_id),
        Json(StatusBody {
            status: status.to_owned(),
        }),
    )
    .await;
    Ok(respond(result).await?.0)
}

#[tokio::test]
#[ignore = "needs TIPJAR_TEST_DB"]
async fn handlers_enforce_membership_and_ownership() -> Result<(), AppError> {
    let db = connect().await?;
    let state = app_state(&db);
    let alice = new_user(&db, "alice").await?;
    let bob = new_user(&db, "bob").await?;
    let mallory = new_user(&db, "mallory").await?;

    let created = api::jar::create(
        State(state.clone()),
        signed_in(&alice),
        Json(serde_json::from_value(
            json!({"name": "  Studio  ", "description": " "}),
        )?),
    )
    .await;
    let (status, data) = respond(created).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(data["success"], true);
    let jar_id = i32::try_from(data["jar_id"].as_i64().unwrap()).unwrap();
    assert_eq!(data["redirect"], format!("/jars/{jar_id}"));
    let invite_code = data["invite_code"].as_str().unwrap().to_owned();
    assert_eq!(invite_code.len(), INVITE_CODE_LEN);
    assert_eq!(
        TipJar::select_by_id(&db, jar_id).await?.unwrap().name,
        "Studio"
    );

    let join = |user: &UserRow, code: &str| {
        api::jar::join(
            State(state.clone()),
            signed_in(user),
            Json(JoinJarBody {
                invite_code: code.to_owned(),
            }),
        )
    };
    assert_eq!(
        respond(join(&bob, "zzzzzzzz").await).await?.0,
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        respond(join(&bob, "").await).await?.0,
        StatusCode::BAD_REQUEST
    );
    let (status, data) = respond(join(&bob, &format!(" {invite_code} ")).await).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(data["jar_id"], jar_id);
    assert_eq!(
        respond(join(&bob, &invite_code).await).await?.0,
        StatusCode::BAD_REQUEST
    );

    let detail = |user: &UserRow, id: i32| {
        api::jar::detail(State(state.clone()), signed_in(user), Path(id))
    };
    assert_eq!(
        respond(detail(&mallory, jar_id).await).await?.0,
        StatusCode::FORBIDDEN
    );
    assert_eq!(
        respond(detail(&bob, i32::MAX).await).await?.0,
        StatusCode::NOT_FOUND
    );
    let (status, data) = respond(detail(&bob, jar_id).await).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(data["role"], "member");
    assert_eq!(data["is_admin"], false);
    assert_eq!(data["members"].as_array().map(Vec::len), Some(2));
    assert_eq!(data["balances"][1]["role"], "member");

    let general = OffenseType::list_active(&db, jar_id).await?.remove(0);
    let elsewhere = new_jar(&db, "Elsewhere", &mallory).await?;
    let foreign = OffenseType::list_active(&db, elsewhere).await?.remove(0);
    let retired = OffenseType::insert(
        &db,
        &NewOffenseType::new(
            jar_id,
            OffenseTypeFields {
                name: "Retired".to_owned(),
                description: None,
                cost_amount: Some(Cents(100)),
                cost_unit: Some("USD".to_owned()),
            },
        ),
    )
    .await?;
    OffenseType::set_active(&db, retired.id, false).await?;

    let report_body = |offender: &UserRow, type_id: i32, cost: Value| {
        json!({
            "offender_id": offender.id,
            "offense_type_id": type_id,
            "notes": "left the oven on",
            "cost_override": cost,
        })
    };
    let (forbidden, bad) = (StatusCode::FORBIDDEN, StatusCode::BAD_REQUEST);
    let rejected = [
        (&alice, report_body(&mallory, general.id, json!(null)), forbidden),
        (&mallory, report_body(&bob, general.id, json!(null)), forbidden),
        (&alice, report_body(&bob, foreign.id, json!(null)), bad),
        (&alice, report_body(&bob, retired.id, json!(null)), bad),
        (&alice, report_body(&bob, general.id, json!("-5")), bad),
        (&alice, report_body(&bob, general.id, json!("abc")), bad),
    ];
    for (reporter, request, expected) in rejected {
        let (status, _) = report_as(&state, reporter, jar_id, request).await?;
        assert_eq!(status, expected);
    }
    assert_eq!(
        Offense::list_for_jar(&db, jar_id, &OffenseFilter::default())
            .await?
            .total,
        0
    );

    let request = report_body(&bob, general.id, json!(2.5));
    let (status, data) = report_as(&state, &alice, jar_id, request).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(data["success"], true);
    assert_eq!(data["offense"]["status"], "pending");
    assert_eq!(data["offense"]["cost_override_cents"], 250);
    assert_eq!(data["redirect"], format!("/jars/{jar_id}"));
    let offense_id = i32::try_from(data["offense"]["id"].as_i64().unwrap()).unwrap();

    assert_eq!(
        set_status_as(&state, &bob, offense_id, "paid").await?,
        StatusCode::FORBIDDEN
    );
    assert_eq!(
        set_status_as(&state, &alice, offense_id, "settled").await?,
        StatusCode::BAD_REQUEST
    );

    let pay = |user: &UserRow| {
        api::payment::pay(
            State(state.clone()),
            signed_in(user),
            Path(offense_id),
            Json(PayBody {
                amount: Some(AmountInput::Text("2.50".to_owned())),
                ..Default::default()
            }),
        )
    };
    assert_eq!(
        respond(pay(&mallory).await).await?.0,
        StatusCode::FORBIDDEN
    );
    let (status, data) = respond(pay(&bob).await).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(data["payment"]["verified"], false);
    assert_eq!(data["payment"]["amount_cents"], 250);
    assert_eq!(data["offense_status"], "pending");

    assert_eq!(
        set_status_as(&state, &alice, offense_id, "paid").await?,
        StatusCode::OK
    );
    let detail = Offense::resolve_detail(&db, offense_id).await?;
    assert_eq!(detail.status, OffenseStatus::Paid);
    assert!(detail.settled);
    Ok(())
}
