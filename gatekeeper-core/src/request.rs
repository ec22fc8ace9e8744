/// Read-only view over an inbound request, the only thing the FSM and its
/// predicates are allowed to see. Transport-specific adapters (the `axum`
/// wiring in the `gatekeeper` binary) implement this trait once; everything
/// downstream is transport-agnostic.
pub trait HttpRequestView {
    fn request_uri(&self) -> &str;
    fn query_arg(&self, name: &str) -> Option<&str>;
    fn post_arg(&self, name: &str) -> Option<&str>;
    fn cookie(&self, name: &str) -> Option<&str>;
    fn remote_ip(&self) -> &[u8];
    fn is_post(&self) -> bool;
}

#[cfg(test)]
pub mod test_support {
    use super::HttpRequestView;
    use std::collections::HashMap;

    /// In-memory stand-in for [`HttpRequestView`], used across unit tests for
    /// the FSM, predicates, and actions.
    #[derive(Default)]
    pub struct FakeRequest {
        pub uri: String,
        pub query: HashMap<String, String>,
        pub post: HashMap<String, String>,
        pub cookies: HashMap<String, String>,
        pub ip: Vec<u8>,
        pub post_method: bool,
    }

    impl FakeRequest {
        pub fn get(uri: &str, ip: &[u8]) -> Self {
            Self {
                uri: uri.to_string(),
                ip: ip.to_vec(),
                ..Default::default()
            }
        }

        pub fn with_query(mut self, key: &str, value: &str) -> Self {
            self.query.insert(key.to_string(), value.to_string());
            self
        }

        pub fn with_cookie(mut self, key: &str, value: &str) -> Self {
            self.cookies.insert(key.to_string(), value.to_string());
            self
        }

        pub fn as_post(mut self, result: &str) -> Self {
            self.post_method = true;
            self.post.insert("result".to_string(), result.to_string());
            self
        }
    }

    impl HttpRequestView for FakeRequest {
        fn request_uri(&self) -> &str {
            &self.uri
        }
        fn query_arg(&self, name: &str) -> Option<&str> {
            self.query.get(name).map(String::as_str)
        }
        fn post_arg(&self, name: &str) -> Option<&str> {
            self.post.get(name).map(String::as_str)
        }
        fn cookie(&self, name: &str) -> Option<&str> {
            self.cookies.get(name).map(String::as_str)
        }
        fn remote_ip(&self) -> &[u8] {
            &self.ip
        }
        fn is_post(&self) -> bool {
            self.post_method
        }
    }
}
