use serde::{Deserialize, Serialize};

/// Build-time / config-file constants for the admission gate.
///
/// Mirrors `knhk_sidecar::config::SidecarConfig`: a flat, `Serialize`/`Deserialize`
/// struct with a `Default` impl matching the upstream defaults, loadable from a
/// config file and overridable by CLI flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Secret used to derive `authkey` and `ticket` MACs.
    pub authkey_secret: String,
    /// Secret used to derive challenge secrets (the PoW input given to clients).
    pub pow_secret: String,
    /// Unused salt slot, kept for config-surface parity with the original gate.
    pub salt: String,

    /// PBKDF2 iteration count applied to every challenge secret.
    pub pbkdf2_iterations: u32,
    /// Number of challenges held in each generation.
    pub no_challenges: u32,

    /// Bucket width, in bits, for the `authkey` token (default: 8s buckets).
    pub authkey_window_bits: u32,
    /// Bucket width, in bits, for the `ticket` token (default: 256s buckets).
    pub ticket_window_bits: u32,
    /// Bucket width, in bits, for challenge-generation rotation (default: 256s).
    pub regen_interval_bits: u32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            authkey_secret: "phu8sae0Reih8vohngohjaix8zaeshei1Oochaideiz7jieti1ahfohJaBahngeP"
                .to_string(),
            pow_secret: "Gu8aimeih3oev2Kae6kooshoo9iej1me7aoquieShueze6Faelang0ruu0ooquai"
                .to_string(),
            salt: String::new(),
            pbkdf2_iterations: 65_535 * 3,
            no_challenges: 512,
            authkey_window_bits: 3,
            ticket_window_bits: 8,
            regen_interval_bits: 8,
        }
    }
}

impl GateConfig {
    /// Load a config from a TOML file, falling back to defaults for unset fields.
    pub fn from_file(path: &std::path::Path) -> crate::error::GateResult<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| crate::error::GateError::ConfigRead {
                path: path.display().to_string(),
                source: e,
            })?;
        toml::from_str(&content).map_err(|e| crate::error::GateError::ConfigParse {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// Ticket cookie lifetime in whole seconds (`2^ticket_window_bits`).
    pub fn ticket_lifetime_secs(&self) -> u64 {
        1u64 << self.ticket_window_bits
    }

    /// Rotation bucket width in whole seconds (`2^regen_interval_bits`).
    pub fn regen_interval_secs(&self) -> u64 {
        1u64 << self.regen_interval_bits
    }
}
