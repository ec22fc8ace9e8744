use crate::error::{GateError, GateResult};

const PLACEHOLDER: &str = "CHALLENGEPLACEHOLDER";
const ITERATIONS_MARKER: &str = "PBKDFITERATIONS";

/// The PoW page, loaded once at startup and split around the one spot where a
/// per-request challenge secret gets spliced in.
pub struct Template {
    prefix: Vec<u8>,
    suffix: Vec<u8>,
}

impl Template {
    /// Load `path`, replace every `PBKDFITERATIONS` marker with the decimal
    /// iteration count, then split on the single `CHALLENGEPLACEHOLDER`
    /// marker. Fatal if the file is missing, unreadable, or lacks the marker.
    pub fn load(path: &std::path::Path, pbkdf2_iterations: u32) -> GateResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| GateError::TemplateRead {
            path: path.display().to_string(),
            source: e,
        })?;

        let contents = contents.replace(ITERATIONS_MARKER, &pbkdf2_iterations.to_string());

        let pos = contents
            .find(PLACEHOLDER)
            .ok_or_else(|| GateError::TemplateMissingPlaceholder {
                path: path.display().to_string(),
            })?;

        let prefix = contents.as_bytes()[..pos].to_vec();
        let suffix = contents.as_bytes()[pos + PLACEHOLDER.len()..].to_vec();

        Ok(Self { prefix, suffix })
    }

    /// Splice `challenge_secret_b64` between prefix and suffix.
    pub fn render(&self, challenge_secret_b64: &str) -> Vec<u8> {
        let mut body = Vec::with_capacity(
            self.prefix.len() + challenge_secret_b64.len() + self.suffix.len(),
        );
        body.extend_from_slice(&self.prefix);
        body.extend_from_slice(challenge_secret_b64.as_bytes());
        body.extend_from_slice(&self.suffix);
        body
    }
}
