use std::path::PathBuf;

/// Server settings, read from `SHAREIT_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends since the last compaction that trigger the next one.
    pub compact_threshold: u64,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5433,
            data_dir: PathBuf::from("./data"),
            password: "shareit".into(),
            max_connections: 256,
            compact_threshold: 1000,
            tls_cert: None,
            tls_key: None,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unparseable numbers fall back to the default.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            bind: get("SHAREIT_BIND").unwrap_or(defaults.bind),
            port: parsed(&get, "SHAREIT_PORT").unwrap_or(defaults.port),
            data_dir: get("SHAREIT_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            password: get("SHAREIT_PASSWORD").unwrap_or(defaults.password),
            max_connections: parsed(&get, "SHAREIT_MAX_CONNECTIONS").unwrap_or(defaults.max_connections),
            compact_threshold: parsed(&get, "SHAREIT_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            tls_cert: get("SHAREIT_TLS_CERT"),
            tls_key: get("SHAREIT_TLS_KEY"),
            metrics_port: parsed(&get, "SHAREIT_METRICS_PORT"),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("shareit.wal")
    }
}

fn parsed<T: std::str::FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    get(key).and_then(|s| s.parse().ok())
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
    fn defaults_when_unset() {
        let cfg = Config::from_lookup(lookup(&[]));
        assert_eq!(cfg.listen_addr(), "0.0.0.0:5433");
        assert_eq!(cfg.max_connections, 256);
        assert_eq!(cfg.compact_threshold, 1000);
        assert_eq!(cfg.metrics_port, None);
        assert_eq!(cfg.wal_path(), PathBuf::from("./data/shareit.wal"));
    }

    #[test]
    fn overrides_from_env() {
        let cfg = Config::from_lookup(lookup(&[
            ("SHAREIT_PORT", "6000"),
            ("SHAREIT_BIND", "127.0.0.1"),
            ("SHAREIT_DATA_DIR", "/var/lib/shareit"),
            ("SHAREIT_MAX_CONNECTIONS", "8"),
            ("SHAREIT_METRICS_PORT", "9000"),
        ]));
        assert_eq!(cfg.listen_addr(), "127.0.0.1:6000");
        assert_eq!(cfg.max_connections, 8);
        assert_eq!(cfg.metrics_port, Some(9000));
        assert_eq!(cfg.wal_path(), PathBuf::from("/var/lib/shareit/shareit.wal"));
    }

    #[test]
    fn garbage_numbers_fall_back() {
        let cfg = Config::from_lookup(lookup(&[
            ("SHAREIT_PORT", "not-a-port"),
            ("SHAREIT_COMPACT_THRESHOLD", "-1"),
        ]));
        assert_eq!(cfg.port, 5433);
        assert_eq!(cfg.compact_threshold, 1000);
    }
}
