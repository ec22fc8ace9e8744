use thiserror::Error;

/// Errors that abort the process: a misconfiguration or a broken invariant.
///
/// Per the admission gate's error handling design, nothing a client sends can
/// produce one of these — they only fire during startup or when the FSM/lookup
/// tables are wired up incorrectly.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("cannot bind listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read template file {path}: {source}")]
    TemplateRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("template file {path} is missing the CHALLENGEPLACEHOLDER marker")]
    TemplateMissingPlaceholder { path: String },

    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("fsm id {0} registered twice")]
    DuplicateFsmId(u32),

    #[error("fsm id {0} registered as both a predicate and an endpoint")]
    ConflictingFsmId(u32),

    #[error("fsm transition target {0} does not exist")]
    DanglingFsmTarget(u32),

    #[error("fsm traversal exceeded the maximum depth of {max}")]
    FsmDepthExceeded { max: u32 },

    #[error("fsm entered an id {0} with neither a predicate nor an endpoint")]
    UnknownFsmId(u32),

    #[error("challenge index {index} not found in a collection of size {size}")]
    ChallengeLookupMiss { index: u32, size: u32 },

    #[error("grant-ticket request URI too short: got {got} bytes, need at least {need}")]
    GrantTicketUriTooShort { got: usize, need: usize },
}

pub type GateResult<T> = Result<T, GateError>;
