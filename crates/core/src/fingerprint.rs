//! Step fingerprints used as build-cache keys.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

/// A deterministic content identifier for one build step.
///
/// The fingerprint is the base64 encoding of the verb name and the canonical
/// string form of its arguments, joined with `", "`. It deliberately does not
/// include the parent image id; the executor's cache index disambiguates
/// steps that share a fingerprint but diverge in history.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the fingerprint for a verb invocation.
    pub fn compute(verb: &str, args: &[String]) -> Self {
        let mut parts = Vec::with_capacity(args.len() + 1);
        parts.push(verb.to_string());
        parts.extend(args.iter().cloned());
        Fingerprint(STANDARD.encode(parts.join(", ")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_known_encodings() {
        assert_eq!(
            Fingerprint::compute("run", &["true".to_string()]).as_str(),
            "cnVuLCB0cnVl"
        );
        assert_eq!(
            Fingerprint::compute("from", &["alpine".to_string()]).as_str(),
            "ZnJvbSwgYWxwaW5l"
        );
        assert_eq!(Fingerprint::compute("debug", &[]).as_str(), "ZGVidWc=");
    }

    #[test]
    fn joins_arguments_with_comma_space() {
        let fp = Fingerprint::compute(
            "copy",
            &["a.txt".to_string(), "/app/a.txt".to_string()],
        );
        assert_eq!(fp.as_str(), "Y29weSwgYS50eHQsIC9hcHAvYS50eHQ=");
    }

    #[test]
    fn deterministic_across_invocations() {
        let args = vec!["x".to_string(), "y".to_string()];
        assert_eq!(
            Fingerprint::compute("env", &args),
            Fingerprint::compute("env", &args)
        );
    }

    #[test]
    fn distinguishes_verbs_and_arguments() {
        let a = Fingerprint::compute("run", &["true".to_string()]);
        let b = Fingerprint::compute("run", &["false".to_string()]);
        let c = Fingerprint::compute("cmd", &["true".to_string()]);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
