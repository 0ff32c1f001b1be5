//! HTTP surface (spec.md §6.1): the pixel endpoint, the collector script, and
//! `/health`. Router assembly mirrors `rush-api::main`'s `Router::new()` +
//! `CorsLayer`/`TraceLayer` + `.with_state(...)` shape.

use super::classify::extract_client_ip;
use super::forward::forward;
use super::EdgeState;
use crate::record::TrackingRecord;
use axum::extract::{ConnectInfo, Path, RawQuery, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// 43-byte transparent 1x1 GIF, pre-allocated once.
pub const TRANSPARENT_GIF: [u8; 43] = [
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0xff, 0xff,
    0xff, 0x00, 0x00, 0x00, 0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3b,
];

fn pixel_path_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"(?i)^/([A-Za-z0-9_-]{1,64})/([A-Za-z0-9_-]{1,64})_SMART\.GIF$").unwrap()
    })
}

fn ident_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"^[A-Za-z0-9_-]{1,64}$").unwrap())
}

pub fn build_router(state: EdgeState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/js/{company}/{pixel}", get(serve_script))
        .fallback(get(serve_pixel))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(_state): State<EdgeState>) -> impl IntoResponse {
    // Edge has no enrichment queue of its own (that's the worker's bounded
    // channel); `queueDepth` here tracks IPC backpressure, always 0 until
    // the client-side connection pool reports it.
    Json(serde_json::json!({
        "status": "ok",
        "queueDepth": 0,
        "queueStatus": "ok",
    }))
}

fn security_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "referrer-policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        "permissions-policy",
        HeaderValue::from_static("camera=(), microphone=(), geolocation=()"),
    );
    headers
}

async fn serve_script(
    Path((company, pixel)): Path<(String, String)>,
) -> Result<impl IntoResponse, StatusCode> {
    if !ident_re().is_match(&company) || !ident_re().is_match(&pixel) {
        return Err(StatusCode::BAD_REQUEST);
    }
    let mut headers = security_headers();
    headers.insert("content-type", HeaderValue::from_static("application/javascript"));
    headers.insert(
        "cache-control",
        HeaderValue::from_static("public, max-age=3600"),
    );
    Ok((headers, COLLECTOR_SCRIPT))
}

/// Out of scope beyond serving a byte-identical stub: the browser script's
/// internal behavior is an external collaborator (spec.md §1).
const COLLECTOR_SCRIPT: &str = "/* tracepixel collector: see external script repository */\n";

async fn serve_pixel(
    State(state): State<EdgeState>,
    headers: HeaderMap,
    uri: axum::http::Uri,
    RawQuery(query): RawQuery,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    let path = uri.path().to_string();
    let mut response_headers = security_headers();
    response_headers.insert("content-type", HeaderValue::from_static("image/gif"));
    response_headers.insert(
        "cache-control",
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    response_headers.insert(
        "accept-ch",
        HeaderValue::from_static(
            "Sec-CH-UA-Platform, Sec-CH-UA-Model, Sec-CH-UA-Full-Version-List, Sec-CH-UA-Arch",
        ),
    );

    let Some(captures) = pixel_path_re().captures(&path) else {
        // Mandatory sequence step (a): path must match, else we still return
        // the GIF — the Edge endpoint is effectively never-fail (spec.md §7)
        // — but we skip the capture/enrichment/forward steps entirely.
        return (StatusCode::OK, response_headers, TRANSPARENT_GIF.to_vec());
    };
    let company_id = captures[1].to_string();
    let pixel_id = captures[2].to_string();

    let client_ip = extract_client_ip(&headers, Some(peer.ip()));
    let ip_string = client_ip.map(|ip| ip.to_string()).unwrap_or_default();
    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let referer = headers
        .get(axum::http::header::REFERER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let headers_json = headers_to_json(&headers);

    let mut record = TrackingRecord::new(
        company_id,
        pixel_id,
        ip_string.clone(),
        user_agent,
        referer,
        path,
        headers_json,
        query.unwrap_or_default(),
    );

    // Fast enrichers (spec.md §4.1.1), synchronous, sub-millisecond budget.
    if let Some(ip) = client_ip {
        let ip_type = state.reserved_ranges.classify(ip);
        record = record.with_enrichment("ipType", ip_type.as_str());
        record = record.with_enrichment("skipGeo", if ip_type.skip_geo() { "1" } else { "0" });

        let is_datacenter = state.datacenter_trie.contains(ip);
        record = record.with_enrichment("datacenter", if is_datacenter { "1" } else { "0" });

        let velocity = state.velocity.observe(ip);
        if velocity.rapid_fire {
            record = record.with_enrichment("rapidFire", "1");
        }
        if velocity.sub_second_dupe {
            record = record.with_enrichment("subSecDupe", "1");
        }
        if velocity.subnet_alert {
            record = record.with_enrichment("subnetAlert", "1");
        }

        if let Some(canvas_fp) = record.lookup("canvasFP") {
            let stability = state.fingerprint_stability.observe(&ip_string, &canvas_fp);
            if stability.alert {
                record = record.with_enrichment("fpAlert", "1");
            }
        }
    }

    forward(&state, &record).await;

    (StatusCode::OK, response_headers, TRANSPARENT_GIF.to_vec())
}

fn headers_to_json(headers: &HeaderMap) -> String {
    let map: serde_json::Map<String, serde_json::Value> = headers
        .iter()
        .filter_map(|(k, v)| {
            v.to_str()
                .ok()
                .map(|s| (k.as_str().to_string(), serde_json::Value::String(s.to_string())))
        })
        .collect();
    serde_json::Value::Object(map).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gif_is_exactly_43_bytes() {
        assert_eq!(TRANSPARENT_GIF.len(), 43);
    }

    #[test]
    fn pixel_path_regex_matches_case_insensitive_suffix() {
        assert!(pixel_path_re().is_match("/42/1_SMART.GIF"));
        assert!(pixel_path_re().is_match("/42/1_smart.gif"));
        assert!(!pixel_path_re().is_match("/42/1_WRONG.GIF"));
    }

    #[test]
    fn ident_regex_rejects_invalid_characters() {
        assert!(ident_re().is_match("abc-123_XYZ"));
        assert!(!ident_re().is_match("abc/123"));
        assert!(!ident_re().is_match(""));
    }
}
