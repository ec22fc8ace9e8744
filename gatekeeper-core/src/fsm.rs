use crate::actions::{pow_grant_ticket, redirect_to_pow, serve_pow, GateResponse};
use crate::error::{GateError, GateResult};
use crate::request::HttpRequestView;
use crate::state::GateState;
use crate::template::Template;
use std::collections::HashMap;

const MAX_DEPTH: u32 = 100;

/// Identifiers for every node in the admission graph (spec.md §4.6's literal
/// transition table). `Void` means "stop, do nothing" (passthrough).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeId {
    Void,
    HasTicket,
    RequestedPoWPage,
    HasValidAuthKey,
    IsPost,
    PowIsValid,
    ProtectedUrl,
    RedirectToPoW,
    ServePoW,
    PowGrantTicket,
}

enum Node {
    Predicate {
        check: fn(&dyn HttpRequestView, &GateState, &dyn ExtensionPoints) -> bool,
        if_true: NodeId,
        if_false: NodeId,
    },
    Endpoint,
}

/// Extension points the original gate leaves as placeholders (spec.md §9 open
/// question 3): never hard-wire their constants into the predicate table,
/// expose them as overridable behavior instead.
///
/// The default implementation reproduces the stated placeholder constant:
/// `protected_url` always returns `true`.
pub trait ExtensionPoints: Send + Sync {
    fn protected_url(&self, _req: &dyn HttpRequestView) -> bool {
        true
    }
}

/// Default extension points, matching the original source's placeholder
/// constants exactly.
pub struct DefaultExtensionPoints;
impl ExtensionPoints for DefaultExtensionPoints {}

/// The validated, static admission graph. Built once at process start;
/// duplicate ids or dangling targets are a fatal configuration error.
pub struct Graph {
    nodes: HashMap<NodeId, Node>,
}

impl Graph {
    /// Build and validate the literal graph from spec.md §4.6.
    pub fn build() -> GateResult<Self> {
        let mut nodes = HashMap::new();

        fn register_predicate(
            id: NodeId,
            check: fn(&dyn HttpRequestView, &GateState, &dyn ExtensionPoints) -> bool,
            if_true: NodeId,
            if_false: NodeId,
            nodes: &mut HashMap<NodeId, Node>,
        ) -> GateResult<()> {
            if nodes.contains_key(&id) {
                return Err(GateError::DuplicateFsmId(id as u32));
            }
            nodes.insert(
                id,
                Node::Predicate {
                    check,
                    if_true,
                    if_false,
                },
            );
            Ok(())
        }

        register_predicate(
            NodeId::HasTicket,
            predicates::has_ticket,
            NodeId::Void,
            NodeId::RequestedPoWPage,
            &mut nodes,
        )?;
        register_predicate(
            NodeId::RequestedPoWPage,
            predicates::requested_pow_page,
            NodeId::HasValidAuthKey,
            NodeId::ProtectedUrl,
            &mut nodes,
        )?;
        register_predicate(
            NodeId::HasValidAuthKey,
            predicates::has_valid_authkey,
            NodeId::IsPost,
            NodeId::RedirectToPoW,
            &mut nodes,
        )?;
        register_predicate(
            NodeId::IsPost,
            predicates::is_post,
            NodeId::PowIsValid,
            NodeId::ServePoW,
            &mut nodes,
        )?;
        register_predicate(
            NodeId::PowIsValid,
            predicates::pow_is_valid,
            NodeId::PowGrantTicket,
            NodeId::ServePoW,
            &mut nodes,
        )?;
        register_predicate(
            NodeId::ProtectedUrl,
            predicates::protected_url,
            NodeId::RedirectToPoW,
            NodeId::Void,
            &mut nodes,
        )?;

        for id in [NodeId::RedirectToPoW, NodeId::ServePoW, NodeId::PowGrantTicket] {
            if nodes.contains_key(&id) {
                return Err(GateError::ConflictingFsmId(id as u32));
            }
            nodes.insert(id, Node::Endpoint);
        }

        Ok(Self { nodes })
    }
}

/// Outcome of running the FSM to completion.
pub enum Outcome {
    /// Reached `Void` — the caller should forward the request to the origin.
    Passthrough,
    /// Reached an endpoint that produced a response.
    Response(GateResponse),
}

/// Run the admission graph starting at `hasTicket` (spec.md §4.6).
pub fn enter(
    graph: &Graph,
    state: &GateState,
    template: &Template,
    ext: &dyn ExtensionPoints,
    req: &dyn HttpRequestView,
) -> GateResult<Outcome> {
    run(graph, state, template, ext, req, NodeId::HasTicket, 0)
}

fn run(
    graph: &Graph,
    state: &GateState,
    template: &Template,
    ext: &dyn ExtensionPoints,
    req: &dyn HttpRequestView,
    id: NodeId,
    depth: u32,
) -> GateResult<Outcome> {
    if depth >= MAX_DEPTH {
        return Err(GateError::FsmDepthExceeded { max: MAX_DEPTH });
    }

    if id == NodeId::Void {
        return Ok(Outcome::Passthrough);
    }

    match graph.nodes.get(&id) {
        Some(Node::Endpoint) => Ok(Outcome::Response(run_endpoint(id, state, template, req)?)),
        Some(Node::Predicate {
            check,
            if_true,
            if_false,
        }) => {
            let next = if check(req, state, ext) { *if_true } else { *if_false };
            run(graph, state, template, ext, req, next, depth + 1)
        }
        None => Err(GateError::UnknownFsmId(id as u32)),
    }
}

fn run_endpoint(
    id: NodeId,
    state: &GateState,
    template: &Template,
    req: &dyn HttpRequestView,
) -> GateResult<GateResponse> {
    match id {
        NodeId::RedirectToPoW => Ok(redirect_to_pow(state, req)),
        NodeId::ServePoW => serve_pow(state, template, req),
        NodeId::PowGrantTicket => pow_grant_ticket(state, req),
        _ => unreachable!("run_endpoint only called for endpoint ids"),
    }
}

mod predicates {
    use super::ExtensionPoints;
    use crate::request::HttpRequestView;
    use crate::state::GateState;
    use crate::{lookup, token};

    const URL_PREFIX: &str = "/_securityValidation/";
    const TICKET_COOKIE: &str = "_securityValidation";

    pub fn has_ticket(req: &dyn HttpRequestView, state: &GateState, _ext: &dyn ExtensionPoints) -> bool {
        match req.cookie(TICKET_COOKIE) {
            Some(cookie) => token::validate(
                cookie,
                req.remote_ip(),
                state.clock.now(),
                state.config.ticket_window_bits,
                state.config.authkey_secret.as_bytes(),
            ),
            None => false,
        }
    }

    pub fn requested_pow_page(req: &dyn HttpRequestView, _state: &GateState, _ext: &dyn ExtensionPoints) -> bool {
        req.request_uri().starts_with(URL_PREFIX)
    }

    pub fn has_valid_authkey(req: &dyn HttpRequestView, state: &GateState, _ext: &dyn ExtensionPoints) -> bool {
        match req.query_arg("authkey") {
            Some(key) => token::validate(
                key,
                req.remote_ip(),
                state.clock.now(),
                state.config.authkey_window_bits,
                state.config.authkey_secret.as_bytes(),
            ),
            None => false,
        }
    }

    pub fn is_post(req: &dyn HttpRequestView, _state: &GateState, _ext: &dyn ExtensionPoints) -> bool {
        req.is_post()
    }

    pub fn pow_is_valid(req: &dyn HttpRequestView, state: &GateState, _ext: &dyn ExtensionPoints) -> bool {
        let authkey = req.query_arg("authkey").unwrap_or_default();
        let result = req.post_arg("result").unwrap_or_default();
        let current = state.current();
        let prev = state.prev();
        lookup::verify(&current, &prev, authkey.as_bytes(), result)
    }

    pub fn protected_url(req: &dyn HttpRequestView, _state: &GateState, ext: &dyn ExtensionPoints) -> bool {
        ext.protected_url(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::config::GateConfig;
    use crate::request::test_support::FakeRequest;
    use std::sync::Arc;

    fn test_fixture() -> (Arc<GateState>, Template, Graph) {
        let mut cfg = GateConfig::default();
        cfg.no_challenges = 4;
        cfg.pbkdf2_iterations = 10;
        let state = GateState::bootstrap(cfg, Clock::new());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("serve.html");
        std::fs::write(&path, "<html>CHALLENGEPLACEHOLDER</html>").unwrap();
        let template = Template::load(&path, 1).unwrap();
        let graph = Graph::build().unwrap();
        (state, template, graph)
    }

    #[test]
    fn graph_builds_without_duplicate_or_dangling_ids() {
        assert!(Graph::build().is_ok());
    }

    #[test]
    fn s1_unprotected_request_redirects_to_pow() {
        let (state, template, graph) = test_fixture();
        let req = FakeRequest::get("/foo", &[203, 0, 113, 5]);
        let outcome = enter(&graph, &state, &template, &DefaultExtensionPoints, &req).unwrap();
        match outcome {
            Outcome::Response(resp) => {
                assert_eq!(resp.status, 302);
                assert!(resp.headers[0].1.starts_with("/_securityValidation/?authkey="));
            }
            Outcome::Passthrough => panic!("expected a redirect"),
        }
    }

    #[test]
    fn s2_valid_authkey_get_serves_pow_html() {
        let (state, template, graph) = test_fixture();
        let authkey = crate::token::derive(
            &[203, 0, 113, 5],
            crate::token::bucket(state.clock.now(), state.config.authkey_window_bits),
            state.config.authkey_secret.as_bytes(),
        );
        let uri = format!("/_securityValidation/?authkey={}&redirect=/foo", authkey);
        let req = FakeRequest::get(&uri, &[203, 0, 113, 5]).with_query("authkey", &authkey);
        let outcome = enter(&graph, &state, &template, &DefaultExtensionPoints, &req).unwrap();
        match outcome {
            Outcome::Response(resp) => {
                assert_eq!(resp.status, 200);
                assert!(resp.body.starts_with(b"<html>"));
            }
            Outcome::Passthrough => panic!("expected served html"),
        }
    }

    #[test]
    fn s4_wrong_proof_reserves_pow_html() {
        let (state, template, graph) = test_fixture();
        let authkey = crate::token::derive(
            &[203, 0, 113, 5],
            crate::token::bucket(state.clock.now(), state.config.authkey_window_bits),
            state.config.authkey_secret.as_bytes(),
        );
        let uri = format!("/_securityValidation/?authkey={}&redirect=/foo", authkey);
        let req = FakeRequest::get(&uri, &[203, 0, 113, 5])
            .with_query("authkey", &authkey)
            .as_post("deadbeef");
        let outcome = enter(&graph, &state, &template, &DefaultExtensionPoints, &req).unwrap();
        match outcome {
            Outcome::Response(resp) => assert_eq!(resp.status, 200),
            Outcome::Passthrough => panic!("expected re-served html"),
        }
    }

    #[test]
    fn s3_correct_proof_grants_ticket_and_redirects_to_original_uri() {
        let (state, template, graph) = test_fixture();
        let authkey = crate::token::derive(
            &[203, 0, 113, 5],
            crate::token::bucket(state.clock.now(), state.config.authkey_window_bits),
            state.config.authkey_secret.as_bytes(),
        );
        let uri = format!("/_securityValidation/?authkey={}&redirect=/foo", authkey);
        let current = state.current();
        let idx = crate::lookup::index_for_authkey(authkey.as_bytes(), current.challenges.len() as u32);
        let proof = current.challenges[idx as usize].proof().to_string();
        drop(current);

        let req = FakeRequest::get(&uri, &[203, 0, 113, 5])
            .with_query("authkey", &authkey)
            .as_post(&proof);
        let outcome = enter(&graph, &state, &template, &DefaultExtensionPoints, &req).unwrap();
        match outcome {
            Outcome::Response(resp) => {
                assert_eq!(resp.status, 302);
                assert_eq!(resp.headers[0].1, "/foo");
                let cookie = resp.set_cookie.expect("ticket cookie");
                assert_eq!(cookie.name, "_securityValidation");
            }
            Outcome::Passthrough => panic!("expected a ticket grant redirect"),
        }
    }

    #[test]
    fn s6_stale_authkey_beyond_grace_redirects_to_fresh_one() {
        let (state, template, graph) = test_fixture();
        let window_bits = state.config.authkey_window_bits;
        let grace = crate::token::grace_buckets(window_bits);
        let current_bucket = crate::token::bucket(state.clock.now(), window_bits);
        let stale_bucket = current_bucket.saturating_sub(grace + 1);
        let stale_authkey = crate::token::derive(
            &[203, 0, 113, 5],
            stale_bucket,
            state.config.authkey_secret.as_bytes(),
        );

        let uri = format!("/_securityValidation/?authkey={}", stale_authkey);
        let req = FakeRequest::get(&uri, &[203, 0, 113, 5]).with_query("authkey", &stale_authkey);
        let outcome = enter(&graph, &state, &template, &DefaultExtensionPoints, &req).unwrap();
        match outcome {
            Outcome::Response(resp) => {
                assert_eq!(resp.status, 302);
                let location = &resp.headers[0].1;
                assert!(location.starts_with("/_securityValidation/?authkey="));
                assert_ne!(location, &format!("/_securityValidation/?authkey={}", stale_authkey));
            }
            Outcome::Passthrough => panic!("expected a fresh redirect"),
        }
    }

    #[test]
    fn s5_valid_ticket_passes_through() {
        let (state, template, graph) = test_fixture();
        let ticket = crate::token::derive(
            &[203, 0, 113, 5],
            crate::token::bucket(state.clock.now(), state.config.ticket_window_bits),
            state.config.authkey_secret.as_bytes(),
        );
        let req = FakeRequest::get("/foo", &[203, 0, 113, 5]).with_cookie("_securityValidation", &ticket);
        let outcome = enter(&graph, &state, &template, &DefaultExtensionPoints, &req).unwrap();
        assert!(matches!(outcome, Outcome::Passthrough));
    }
}
