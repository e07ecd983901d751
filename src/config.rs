use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Process settings, read from `STAYBOOK_*` environment variables.
/// Unparseable numbers fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    /// Log appends between compactions.
    pub compact_threshold: u64,
    pub sweep_interval: Duration,
    /// Admin account ensured at startup, if set.
    pub admin_email: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            compact_threshold: 1000,
            sweep_interval: Duration::from_secs(60),
            admin_email: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            data_dir: lookup("STAYBOOK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            metrics_port: parsed(&lookup, "STAYBOOK_METRICS_PORT"),
            compact_threshold: parsed(&lookup, "STAYBOOK_COMPACT_THRESHOLD").unwrap_or(defaults.compact_threshold),
            sweep_interval: parsed(&lookup, "STAYBOOK_SWEEP_INTERVAL_SECS")
                .filter(|secs: &u64| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            admin_email: lookup("STAYBOOK_ADMIN_EMAIL").filter(|s| !s.trim().is_empty()),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("staybook.wal")
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_uses_defaults() {
        assert_eq!(Config::from_lookup(lookup(&[])), Config::default());
    }

    #[test]
    fn values_are_parsed() {
        let cfg = Config::from_lookup(lookup(&[
            ("STAYBOOK_DATA_DIR", "/var/lib/staybook"),
            ("STAYBOOK_METRICS_PORT", "9100"),
            ("STAYBOOK_COMPACT_THRESHOLD", "50"),
            ("STAYBOOK_SWEEP_INTERVAL_SECS", "5"),
            ("STAYBOOK_ADMIN_EMAIL", "ops@example.com"),
        ]));
        assert_eq!(cfg.wal_path(), PathBuf::from("/var/lib/staybook/staybook.wal"));
        assert_eq!(cfg.metrics_port, Some(9100));
        assert_eq!(cfg.compact_threshold, 50);
        assert_eq!(cfg.sweep_interval, Duration::from_secs(5));
        assert_eq!(cfg.admin_email.as_deref(), Some("ops@example.com"));
    }

    #[test]
    fn garbage_falls_back() {
        let cfg = Config::from_lookup(lookup(&[
            ("STAYBOOK_METRICS_PORT", "ninety"),
            ("STAYBOOK_SWEEP_INTERVAL_SECS", "0"),
            ("STAYBOOK_ADMIN_EMAIL", "  "),
        ]));
        assert_eq!(cfg.metrics_port, None);
        assert_eq!(cfg.sweep_interval, Duration::from_secs(60));
        assert_eq!(cfg.admin_email, None);
    }
}
