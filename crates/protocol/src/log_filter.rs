//! Log filter resolution shared by the binaries.
//!
//! `ASSESSMENT_LOG_FILTER` wins over `RUST_LOG`; a directive that fails to
//! parse is skipped rather than aborting startup.

use tracing_subscriber::EnvFilter;

pub const FILTER_ENV: &str = "ASSESSMENT_LOG_FILTER";

/// A parsed filter plus the directive text it came from, for the startup log.
pub struct ResolvedFilter {
    pub filter: EnvFilter,
    pub directive: String,
}

pub fn from_env(default: &str) -> ResolvedFilter {
    resolve(
        [std::env::var(FILTER_ENV).ok(), std::env::var("RUST_LOG").ok()],
        default,
    )
}

fn resolve(candidates: [Option<String>; 2], default: &str) -> ResolvedFilter {
    candidates
        .into_iter()
        .flatten()
        .find_map(|directive| {
            EnvFilter::try_new(&directive)
                .ok()
                .map(|filter| ResolvedFilter { filter, directive })
        })
        .unwrap_or_else(|| ResolvedFilter {
            filter: EnvFilter::new(default),
            directive: default.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_filter_wins_over_rust_log() {
        let resolved = resolve([Some("debug".into()), Some("trace".into())], "info");
        assert_eq!(resolved.directive, "debug");
    }

    #[test]
    fn unparsable_directive_falls_through() {
        let resolved = resolve([Some("assessment=loud".into()), Some("warn".into())], "info");
        assert_eq!(resolved.directive, "warn");

        let resolved = resolve([Some("assessment=loud".into()), None], "info");
        assert_eq!(resolved.directive, "info");
    }
}
