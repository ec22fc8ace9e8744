use crate::error::{GateError, GateResult};
use crate::request::HttpRequestView;
use crate::state::GateState;
use crate::template::Template;
use crate::{lookup, token};

const URL_PREFIX: &str = "/_securityValidation/";
const AUTHKEY_PARAM: &str = "?authkey=";
const REDIRECT_PARAM: &str = "&redirect=";
const TICKET_COOKIE: &str = "_securityValidation";

/// A terminal HTTP response produced by an FSM endpoint. Transport-agnostic —
/// the `gatekeeper` binary's `http` module turns this into an `axum` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub set_cookie: Option<SetCookie>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    pub path: String,
    pub max_age_secs: u64,
    /// Absolute unix-seconds expiry (`now + max_age_secs`), spec.md §6/S3's
    /// literal `Expires=<now+256s>` — the `gatekeeper` binary's `http` module
    /// renders this into an HTTP-date `Expires` header.
    pub expires_unix: u64,
}

impl GateResponse {
    fn redirect(location: String) -> Self {
        Self {
            status: 302,
            headers: vec![("Location".to_string(), location)],
            body: Vec::new(),
            set_cookie: None,
        }
    }
}

/// `redirectToPoW`: 302 to `/_securityValidation/?authkey=<authkey>&redirect=<dest>`.
///
/// `dest` is the original request URI when the request was not already under
/// the PoW prefix, otherwise the tail after `&redirect=` in that URI, or `/`
/// if there is no such tail.
pub fn redirect_to_pow(state: &GateState, req: &dyn HttpRequestView) -> GateResponse {
    let authkey = token::derive(
        req.remote_ip(),
        token::bucket(state.clock.now(), state.config.authkey_window_bits),
        state.config.authkey_secret.as_bytes(),
    );

    let uri = req.request_uri();
    let dest = if !uri.starts_with(URL_PREFIX) {
        uri.to_string()
    } else {
        match uri.find(REDIRECT_PARAM) {
            Some(pos) => uri[pos + REDIRECT_PARAM.len()..].to_string(),
            None => "/".to_string(),
        }
    };

    GateResponse::redirect(format!(
        "{}{}{}{}{}",
        URL_PREFIX, AUTHKEY_PARAM, authkey, REDIRECT_PARAM, dest
    ))
}

/// `servePoW`: 200 with no-cache headers and the rendered challenge page.
pub fn serve_pow(state: &GateState, template: &Template, req: &dyn HttpRequestView) -> GateResult<GateResponse> {
    let authkey = req.query_arg("authkey").unwrap_or_default();
    let current = state.current();
    let secret_b64 = lookup::serve(&current, authkey.as_bytes())?;

    Ok(GateResponse {
        status: 200,
        headers: vec![
            (
                "Cache-Control".to_string(),
                "no-cache, no-store, must-revalidate".to_string(),
            ),
            ("Pragma".to_string(), "no-cache".to_string()),
            ("Expires".to_string(), "0".to_string()),
            (
                "Content-Type".to_string(),
                "text/html; charset=utf-8".to_string(),
            ),
        ],
        body: template.render(&secret_b64),
        set_cookie: None,
    })
}

/// `powGrantTicket`: mint a ticket cookie and redirect to the URL tail after
/// the mandatory `authkey`/`redirect` prefix.
///
/// Fatal (per spec.md §4.7/§7) if the request URI is too short to contain
/// that prefix plus a 56-byte authkey — that indicates a bug upstream in the
/// FSM (only reachable after `hasValidAuthKey` already passed), not a client
/// error.
pub fn pow_grant_ticket(state: &GateState, req: &dyn HttpRequestView) -> GateResult<GateResponse> {
    let required_prefix_len = URL_PREFIX.len() + AUTHKEY_PARAM.len() + token::TOKEN_LEN + REDIRECT_PARAM.len();
    let uri = req.request_uri();
    if uri.len() < required_prefix_len {
        return Err(GateError::GrantTicketUriTooShort {
            got: uri.len(),
            need: required_prefix_len,
        });
    }

    let ticket = token::derive(
        req.remote_ip(),
        token::bucket(state.clock.now(), state.config.ticket_window_bits),
        state.config.authkey_secret.as_bytes(),
    );

    let redirect_tail = &uri[required_prefix_len..];
    let max_age_secs = state.config.ticket_lifetime_secs();

    Ok(GateResponse {
        status: 302,
        headers: vec![("Location".to_string(), redirect_tail.to_string())],
        body: Vec::new(),
        set_cookie: Some(SetCookie {
            name: TICKET_COOKIE.to_string(),
            value: ticket,
            path: "/".to_string(),
            max_age_secs,
            expires_unix: state.clock.now() + max_age_secs,
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::config::GateConfig;
    use crate::request::test_support::FakeRequest;

    fn test_state() -> std::sync::Arc<GateState> {
        let mut cfg = GateConfig::default();
        cfg.no_challenges = 4;
        cfg.pbkdf2_iterations = 10;
        GateState::bootstrap(cfg, Clock::new())
    }

    #[test]
    fn redirect_to_pow_from_protected_url_embeds_original_uri() {
        let state = test_state();
        let req = FakeRequest::get("/foo", &[203, 0, 113, 5]);
        let resp = redirect_to_pow(&state, &req);
        assert_eq!(resp.status, 302);
        let location = &resp.headers[0].1;
        assert!(location.starts_with("/_securityValidation/?authkey="));
        assert!(location.ends_with("&redirect=/foo"));
    }

    #[test]
    fn redirect_to_pow_from_stale_pow_page_keeps_redirect_tail() {
        let state = test_state();
        let req = FakeRequest::get(
            "/_securityValidation/?authkey=stale&redirect=/_securityValidation/",
            &[203, 0, 113, 5],
        );
        let resp = redirect_to_pow(&state, &req);
        assert!(resp.headers[0].1.ends_with("&redirect=/_securityValidation/"));
    }

    #[test]
    fn redirect_to_pow_falls_back_to_slash_without_redirect_tail() {
        let state = test_state();
        let req = FakeRequest::get("/_securityValidation/?authkey=stale", &[203, 0, 113, 5]);
        let resp = redirect_to_pow(&state, &req);
        assert!(resp.headers[0].1.ends_with("&redirect=/"));
    }

    #[test]
    fn grant_ticket_fails_fast_on_short_uri() {
        let state = test_state();
        let req = FakeRequest::get("/_securityValidation/", &[203, 0, 113, 5]);
        assert!(pow_grant_ticket(&state, &req).is_err());
    }

    #[test]
    fn grant_ticket_sets_cookie_and_redirects_to_tail() {
        let state = test_state();
        let authkey = "a".repeat(token::TOKEN_LEN);
        let uri = format!("/_securityValidation/?authkey={}&redirect=/foo", authkey);
        let req = FakeRequest::get(&uri, &[203, 0, 113, 5]);
        let resp = pow_grant_ticket(&state, &req).unwrap();
        assert_eq!(resp.status, 302);
        assert_eq!(resp.headers[0].1, "/foo");
        let cookie = resp.set_cookie.unwrap();
        assert_eq!(cookie.name, TICKET_COOKIE);
        assert_eq!(cookie.path, "/");
        assert_eq!(cookie.max_age_secs, state.config.ticket_lifetime_secs());
        assert_eq!(cookie.expires_unix, state.clock.now() + cookie.max_age_secs);
    }
}
