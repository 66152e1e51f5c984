//! Interactive authorization endpoint: session check, login form, consent,
//! and authorization code issuance.

use anyhow::Result;
use axum::{
    extract::Query,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    Extension, Form,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, info};
use url::Url;

use super::storage::{self, ClientRecord};
use super::types::{AuthorizeQuery, ConsentForm, LoginForm};
use crate::api::handlers::auth::session::{build_session_cookie, current_session};
use crate::api::handlers::auth::{storage as auth_storage, AuthState};
use crate::api::handlers::auth::utils::extract_client_ip;

/// Parameters of an authorization request, revalidated on every step.
#[derive(Debug)]
struct AuthorizeParams {
    client_id: String,
    redirect_uri: String,
    scope: Option<String>,
    state: Option<String>,
}

impl AuthorizeParams {
    fn from_parts(
        client_id: Option<String>,
        redirect_uri: Option<String>,
        scope: Option<String>,
        state: Option<String>,
    ) -> Result<Self, (StatusCode, String)> {
        match (client_id, redirect_uri) {
            (Some(client_id), Some(redirect_uri))
                if !client_id.is_empty() && !redirect_uri.is_empty() =>
            {
                Ok(Self {
                    client_id,
                    redirect_uri,
                    scope: scope.filter(|scope| !scope.is_empty()),
                    state: state.filter(|state| !state.is_empty()),
                })
            }
            _ => Err((
                StatusCode::BAD_REQUEST,
                "client_id and redirect_uri are required".to_string(),
            )),
        }
    }

    /// Relative URL that re-enters the GET branch of /authorize.
    fn authorize_url(&self) -> String {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        serializer.append_pair("client_id", &self.client_id);
        serializer.append_pair("redirect_uri", &self.redirect_uri);
        if let Some(scope) = &self.scope {
            serializer.append_pair("scope", scope);
        }
        if let Some(state) = &self.state {
            serializer.append_pair("state", state);
        }
        format!("/authorize?{}", serializer.finish())
    }
}

/// Resolve and verify the client for an authorization request.
///
/// The redirect URI must exactly match the registered one; on mismatch the
/// user agent is never redirected.
async fn resolve_client(
    pool: &PgPool,
    params: &AuthorizeParams,
) -> Result<Result<ClientRecord, (StatusCode, String)>> {
    let Some(client) = storage::lookup_client(pool, &params.client_id).await? else {
        return Ok(Err((StatusCode::BAD_REQUEST, "Unknown client".to_string())));
    };

    if client.redirect_uri != params.redirect_uri {
        return Ok(Err((
            StatusCode::BAD_REQUEST,
            "redirect_uri does not match the registered value".to_string(),
        )));
    }

    Ok(Ok(client))
}

/// Entry point of the authorization flow.
///
/// With a valid session the consent page is shown; otherwise the login form,
/// which posts back here carrying the original request in hidden fields.
pub async fn authorize(
    Extension(pool): Extension<PgPool>,
    headers: HeaderMap,
    Query(query): Query<AuthorizeQuery>,
) -> Response {
    let params = match AuthorizeParams::from_parts(
        query.client_id,
        query.redirect_uri,
        query.scope,
        query.state,
    ) {
        Ok(params) => params,
        Err(rejection) => return rejection.into_response(),
    };

    let client = match resolve_client(&pool, &params).await {
        Ok(Ok(client)) => client,
        Ok(Err(rejection)) => return rejection.into_response(),
        Err(err) => {
            error!("Authorization request failed: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match current_session(&pool, &headers).await {
        Ok(Some(session)) => {
            Html(consent_page(&session.email, &client.name, &params)).into_response()
        }
        Ok(None) => Html(login_page(&params, None)).into_response(),
        Err(err) => {
            error!("Session lookup failed: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Login submission. On success a session cookie is set and the user agent is
/// sent back (303) to the GET branch to continue with consent.
pub async fn login(
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<AuthState>>,
    headers: HeaderMap,
    Form(form): Form<LoginForm>,
) -> Response {
    let params = match AuthorizeParams::from_parts(
        form.client_id,
        form.redirect_uri,
        form.scope,
        form.state,
    ) {
        Ok(params) => params,
        Err(rejection) => return rejection.into_response(),
    };

    let (Some(identifier), Some(password)) = (form.identifier, form.password) else {
        return (
            StatusCode::BAD_REQUEST,
            "identifier and password are required".to_string(),
        )
            .into_response();
    };

    let cookie = CookieSettings {
        secure: state.config().session_cookie_secure(),
        max_age_seconds: state.config().session_ttl_seconds(),
    };
    match process_login(&pool, cookie, &headers, &params, &identifier, &password).await {
        Ok(response) => response,
        Err(err) => {
            error!("Login failed: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[derive(Clone, Copy)]
struct CookieSettings {
    secure: bool,
    max_age_seconds: i64,
}

async fn process_login(
    pool: &PgPool,
    cookie: CookieSettings,
    headers: &HeaderMap,
    params: &AuthorizeParams,
    identifier: &str,
    password: &str,
) -> Result<Response> {
    let Some(user) = auth_storage::load_user(pool, identifier, password).await? else {
        info!("Rejected login for identifier {identifier}");
        return Ok((
            StatusCode::UNAUTHORIZED,
            Html(login_page(params, Some("Wrong identifier or passphrase"))),
        )
            .into_response());
    };

    let ip_address = extract_client_ip(headers).and_then(|ip| ip.parse().ok());
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok());
    let token = auth_storage::insert_session(pool, user.id, ip_address, user_agent).await?;

    let mut response_headers = HeaderMap::new();
    let cookie_value = build_session_cookie(&token, cookie.secure, cookie.max_age_seconds);
    if let Ok(value) = HeaderValue::from_str(&cookie_value) {
        response_headers.insert(header::SET_COOKIE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&params.authorize_url()) {
        response_headers.insert(header::LOCATION, value);
    }

    Ok((StatusCode::SEE_OTHER, response_headers).into_response())
}

/// Consent submission. Approval issues an authorization code and redirects to
/// the client; denial redirects with `error=access_denied`.
pub async fn consent(
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<AuthState>>,
    headers: HeaderMap,
    Form(form): Form<ConsentForm>,
) -> Response {
    let params = match AuthorizeParams::from_parts(
        form.client_id,
        form.redirect_uri,
        form.scope,
        form.state,
    ) {
        Ok(params) => params,
        Err(rejection) => return rejection.into_response(),
    };

    let approved = form.approve.as_deref() == Some("yes");
    let code_ttl = state.config().code_ttl_seconds();
    match process_consent(&pool, &headers, &params, approved, code_ttl).await {
        Ok(response) => response,
        Err(err) => {
            error!("Consent handling failed: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn process_consent(
    pool: &PgPool,
    headers: &HeaderMap,
    params: &AuthorizeParams,
    approved: bool,
    code_ttl_seconds: i64,
) -> Result<Response> {
    let client = match resolve_client(pool, params).await? {
        Ok(client) => client,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    // Anonymous consent posts go back through the login branch.
    let Some(session) = current_session(pool, headers).await? else {
        return Ok(see_other(&params.authorize_url()));
    };

    if !approved {
        let location = redirect_with(&params.redirect_uri, &[("error", "access_denied")], params.state.as_deref())?;
        return Ok(see_other(&location));
    }

    let code = storage::insert_authorization_code(
        pool,
        client.id,
        session.user_id,
        &params.redirect_uri,
        params.scope.as_deref(),
        code_ttl_seconds,
    )
    .await?;

    info!("Issued authorization code for client {}", client.client_id);

    let location = redirect_with(&params.redirect_uri, &[("code", &code)], params.state.as_deref())?;
    Ok(see_other(&location))
}

fn see_other(location: &str) -> Response {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(location) {
        headers.insert(header::LOCATION, value);
    }
    (StatusCode::SEE_OTHER, headers).into_response()
}

/// Append query parameters to the registered redirect URI, preserving any it
/// already carries.
fn redirect_with(
    redirect_uri: &str,
    pairs: &[(&str, &str)],
    state: Option<&str>,
) -> Result<String> {
    let mut url = Url::parse(redirect_uri)?;
    {
        let mut query = url.query_pairs_mut();
        for (name, value) in pairs {
            query.append_pair(name, value);
        }
        if let Some(state) = state {
            query.append_pair("state", state);
        }
    }
    Ok(url.into())
}

fn html_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn hidden_fields(params: &AuthorizeParams) -> String {
    let mut fields = format!(
        r#"<input type="hidden" name="client_id" value="{}">
<input type="hidden" name="redirect_uri" value="{}">"#,
        html_escape(&params.client_id),
        html_escape(&params.redirect_uri),
    );
    if let Some(scope) = &params.scope {
        fields.push_str(&format!(
            r#"
<input type="hidden" name="scope" value="{}">"#,
            html_escape(scope)
        ));
    }
    if let Some(state) = &params.state {
        fields.push_str(&format!(
            r#"
<input type="hidden" name="state" value="{}">"#,
            html_escape(state)
        ));
    }
    fields
}

fn login_page(params: &AuthorizeParams, error: Option<&str>) -> String {
    let error_html = error.map_or(String::new(), |message| {
        format!("<p class=\"error\">{}</p>", html_escape(message))
    });
    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Sign in</title></head>
<body>
<h1>Sign in</h1>
{error_html}
<form method="post" action="/authorize">
{hidden}
<label>Email or PIN <input type="text" name="identifier" autofocus></label>
<label>Passphrase <input type="password" name="password"></label>
<button type="submit">Sign in</button>
</form>
</body>
</html>"#,
        hidden = hidden_fields(params),
    )
}

fn consent_page(email: &str, client_name: &str, params: &AuthorizeParams) -> String {
    let scope_html = params.scope.as_deref().map_or(String::new(), |scope| {
        format!("<p>Requested scope: {}</p>", html_escape(scope))
    });
    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Authorize {client}</title></head>
<body>
<h1>Authorize {client}</h1>
<p>Signed in as {email}</p>
{scope_html}
<form method="post" action="/authorize/consent">
{hidden}
<button type="submit" name="approve" value="yes">Allow</button>
<button type="submit" name="approve" value="no">Deny</button>
</form>
</body>
</html>"#,
        client = html_escape(client_name),
        email = html_escape(email),
        hidden = hidden_fields(params),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
    use std::time::Duration;

    fn unreachable_pool() -> PgPool {
        let options = PgConnectOptions::new()
            .host("127.0.0.1")
            .port(1)
            .username("invalid")
            .database("invalid")
            .ssl_mode(PgSslMode::Disable);
        PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(200))
            .connect_lazy_with(options)
    }

    fn params() -> AuthorizeParams {
        AuthorizeParams {
            client_id: "abc".to_string(),
            redirect_uri: "https://client.example/cb".to_string(),
            scope: Some("profile".to_string()),
            state: Some("xyz".to_string()),
        }
    }

    #[test]
    fn params_require_client_id_and_redirect_uri() {
        let err = AuthorizeParams::from_parts(None, Some("https://x/y".to_string()), None, None)
            .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);

        let err = AuthorizeParams::from_parts(
            Some(String::new()),
            Some("https://x/y".to_string()),
            None,
            None,
        )
        .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn authorize_url_round_trips_all_parameters() {
        let url = params().authorize_url();
        assert!(url.starts_with("/authorize?"));
        assert!(url.contains("client_id=abc"));
        assert!(url.contains("redirect_uri=https%3A%2F%2Fclient.example%2Fcb"));
        assert!(url.contains("scope=profile"));
        assert!(url.contains("state=xyz"));
    }

    #[test]
    fn redirect_with_appends_code_and_state() {
        let location =
            redirect_with("https://client.example/cb?keep=1", &[("code", "k")], Some("xyz"))
                .unwrap();
        assert!(location.contains("keep=1"));
        assert!(location.contains("code=k"));
        assert!(location.contains("state=xyz"));
    }

    #[test]
    fn redirect_with_rejects_unparseable_uri() {
        assert!(redirect_with("not a url", &[("code", "k")], None).is_err());
    }

    #[test]
    fn pages_escape_untrusted_values() {
        let mut params = params();
        params.state = Some("\"><script>".to_string());
        let page = login_page(&params, Some("<b>nope</b>"));
        assert!(!page.contains("<script>"));
        assert!(page.contains("&lt;b&gt;nope&lt;/b&gt;"));

        let page = consent_page("a@b.example", "<Client>", &params);
        assert!(page.contains("&lt;Client&gt;"));
        assert!(!page.contains("<script>"));
    }

    #[test]
    fn consent_page_posts_to_consent_endpoint() {
        let page = consent_page("a@b.example", "App", &params());
        assert!(page.contains(r#"action="/authorize/consent""#));
        assert!(page.contains(r#"name="approve" value="yes""#));
    }

    #[tokio::test]
    async fn process_login_propagates_db_failure() {
        let pool = unreachable_pool();
        let cookie = CookieSettings {
            secure: false,
            max_age_seconds: 43_200,
        };
        let result =
            process_login(&pool, cookie, &HeaderMap::new(), &params(), "0042", "horse").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn process_consent_propagates_db_failure() {
        let pool = unreachable_pool();
        let result = process_consent(&pool, &HeaderMap::new(), &params(), true, 600).await;
        assert!(result.is_err());
    }
}
