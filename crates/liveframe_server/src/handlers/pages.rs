use crate::AppState;
use crate::handlers::SESSION_COOKIE;
use axum::{
    extract::{Path, Query, RawQuery, State},
    http::{HeaderMap, Method, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use liveframe_core::LiveframeError;
use liveframe_core::command::CookieOptions;
use liveframe_core::handler::RequestMeta;
use liveframe_core::session::generate_token;
use std::collections::HashMap;
use tracing::{error, info};

/// Initial HTTP render for a page.
///
/// Resolves (or issues) the session identity cookie, runs the page's load
/// handler, and returns the full document with the client runtime injected.
pub async fn page_handler(
    State(state): State<AppState>,
    Path(page): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    RawQuery(raw_query): RawQuery,
    method: Method,
    headers: HeaderMap,
    jar: CookieJar,
) -> Response {
    let (session_id, is_new) = match jar.get(SESSION_COOKIE) {
        Some(cookie) => (cookie.value().to_string(), false),
        None => (generate_token(), true),
    };

    let request = RequestMeta {
        method: method.to_string(),
        headers: headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.to_string(), v.to_string()))
            })
            .collect(),
        query,
        path: Some(format!("/pages/{page}")),
    };

    let load = match state.pipeline.handle_page_load(&session_id, &page, request).await {
        Ok(Some(load)) => load,
        Ok(None) => {
            return (StatusCode::NOT_FOUND, "page not found").into_response();
        }
        Err(LiveframeError::TemplateNotFound(page)) => {
            info!("Template missing for page '{}'", page);
            return (StatusCode::NOT_FOUND, "page not found").into_response();
        }
        Err(err) => {
            error!("Page load failed for '{}': {}", page, err);
            return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
        }
    };

    let mut jar = jar;
    if is_new {
        info!("Issuing session cookie {} on /pages/{}", session_id, page);
        jar = jar.add(
            Cookie::build((SESSION_COOKIE, session_id))
                .path("/")
                .http_only(true)
                .same_site(SameSite::Strict)
                .max_age(time::Duration::days(state.session_cookie_days)),
        );
    }
    for (name, value, options) in load.effects.cookies {
        jar = jar.add(build_cookie(name, value, options));
    }

    if let Some(location) = load.effects.redirect {
        return (jar, Redirect::to(&location)).into_response();
    }
    if load.effects.reload {
        // reload points back at the URL as requested, query string included
        let location = match raw_query {
            Some(q) => format!("/pages/{page}?{q}"),
            None => format!("/pages/{page}"),
        };
        return (jar, Redirect::to(&location)).into_response();
    }

    (jar, Html(load.html.unwrap_or_default())).into_response()
}

fn build_cookie(name: String, value: String, options: CookieOptions) -> Cookie<'static> {
    let mut builder = Cookie::build((name, value))
        .path(options.path.unwrap_or_else(|| "/".to_string()))
        .http_only(options.http_only);
    if let Some(seconds) = options.max_age {
        builder = builder.max_age(time::Duration::seconds(seconds));
    }
    if let Some(same_site) = options.same_site {
        builder = builder.same_site(match same_site.to_ascii_lowercase().as_str() {
            "strict" => SameSite::Strict,
            "none" => SameSite::None,
            _ => SameSite::Lax,
        });
    }
    builder.build()
}
