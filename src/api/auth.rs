use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use common_x::restful::{
    axum::{
        extract::{FromRequestParts, Query, State},
        http::request::Parts,
        response::{IntoResponse, Redirect},
    },
    ok,
};
use serde::Deserialize;
use serde_json::json;

use crate::{
    AppView,
    db::{
        jar::TipJar,
        user::{NewUser, User, UserRow},
    },
    error::AppError,
    oauth::{STATE_COOKIE, STATE_MAX_AGE, generate_state},
    session::{SESSION_COOKIE, SessionData, removal_cookie, session_cookie},
};

/// The signed-in user, resolved from the session cookie.
#[derive(Debug, Clone)]
pub(crate) struct CurrentUser {
    pub user: UserRow,
}

impl CurrentUser {
    pub(crate) const fn id(&self) -> i32 {
        self.user.id
    }
}

impl FromRequestParts<AppView> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppView) -> Result<Self, AppError> {
        let jar = CookieJar::from_headers(&parts.headers);
        let session = session_from_jar(&jar, state).ok_or(AppError::Unauthorized)?;
        let user = User::select_by_id(&state.db, session.user_id)
            .await?
            .ok_or(AppError::Unauthorized)?;
        Ok(CurrentUser { user })
    }
}

fn session_from_jar(jar: &CookieJar, state: &AppView) -> Option<SessionData> {
    let token = jar.get(SESSION_COOKIE)?;
    state
        .session
        .validate(token.value())
        .inspect_err(|e| debug!("rejected session: {e}"))
        .ok()
}

fn state_cookie(value: String) -> Cookie<'static> {
    Cookie::build((STATE_COOKIE, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(STATE_MAX_AGE))
        .build()
}

pub(crate) async fn home(State(state): State<AppView>, jar: CookieJar) -> Redirect {
    if session_from_jar(&jar, &state).is_some() {
        Redirect::to("/dashboard")
    } else {
        Redirect::to("/login")
    }
}

/// Starts the provider handshake. `/login` and `/auth/google` both land here.
pub(crate) async fn login(
    State(state): State<AppView>,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    let oauth_state = generate_state();
    let url = state.google.auth_url(&oauth_state)?;
    Ok((jar.add(state_cookie(oauth_state)), Redirect::to(&url)))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

pub(crate) async fn callback(
    State(state): State<AppView>,
    jar: CookieJar,
    Query(query): Query<CallbackQuery>,
) -> Result<impl IntoResponse, AppError> {
    if let Some(error) = query.error {
        return Err(AppError::invalid(format!("authentication failed: {error}")));
    }
    let expected = jar
        .get(STATE_COOKIE)
        .map(Cookie::value)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::invalid("missing oauth state"))?;
    if query.state.as_deref() != Some(expected) {
        return Err(AppError::invalid("oauth state mismatch"));
    }
    let code = query
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::invalid("missing authorization code"))?;

    let access_token = state.google.exchange_code(&code).await?;
    let identity = state.google.user_info(&access_token).await?;
    if !identity.verified_email {
        warn!("login with unverified email: {}", identity.email);
    }

    let user = match User::select_by_google_id(&state.db, &identity.id).await? {
        Some(user) => user,
        None => {
            let user = User::insert(
                &state.db,
                &NewUser {
                    google_id: identity.id,
                    email: identity.email,
                    name: identity.name,
                    avatar: identity.picture,
                },
            )
            .await?;
            info!("user created: id={} email={}", user.id, user.email);
            user
        }
    };

    let token = state.session.create(user.id, &user.email, &user.name)?;
    info!("user logged in: id={}", user.id);
    let jar = jar
        .add(session_cookie(token, state.config.is_production()))
        .remove(removal_cookie(STATE_COOKIE));
    Ok((jar, Redirect::to("/dashboard")))
}

pub(crate) async fn logout(jar: CookieJar) -> impl IntoResponse {
    (jar.remove(removal_cookie(SESSION_COOKIE)), Redirect::to("/login"))
}

pub(crate) async fn dashboard(
    State(state): State<AppView>,
    current: CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    let jars = TipJar::list_for_user(&state.db, current.id()).await?;
    Ok(ok(json!({
        "user": current.user,
        "jars": jars,
    })))
}

#[cfg(test)]
mod tests {
    use common_x::restful::axum::http::{HeaderMap, HeaderValue, StatusCode, header};

    use super::*;

    #[test]
    fn state_cookie_is_short_lived() {
        let cookie = state_cookie("abc".to_owned());
        assert_eq!(cookie.name(), STATE_COOKIE);
        assert_eq!(cookie.value(), "abc");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.max_age(), Some(time::Duration::minutes(10)));
    }

    #[tokio::test]
    async fn logout_expires_session_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("session=abc.def"));
        let response = logout(CookieJar::from_headers(&headers))
            .await
            .into_response();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/login");
        let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        assert!(set_cookie.starts_with("session=;"));
        assert!(set_cookie.contains("Max-Age=0"));
        assert!(set_cookie.contains("Path=/"));
    }
}
