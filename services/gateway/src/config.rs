//! Gateway configuration sourced from environment variables with an optional
//! YAML override file (`GATEHOUSE_CONFIG`).
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_BIND: &str = "0.0.0.0:8080";
pub const DEFAULT_METRICS_BIND: &str = "0.0.0.0:9090";
pub const DEFAULT_WORKSPACE_NAMESPACE: &str = "default";
pub const DEFAULT_GROUP_REFRESH_SECS: u64 = 600;
pub const DEFAULT_RECONCILE_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_RECONCILE_BATCH_SIZE: usize = 100;
pub const DEFAULT_PROVIDER_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_PG_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_PG_CONNECT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_PG_ACQUIRE_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Postgres,
}

impl std::str::FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => bail!("unknown storage backend: {other}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_ms: u64,
    pub acquire_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: SocketAddr,
    pub metrics_bind: SocketAddr,
    pub storage: StorageBackend,
    pub postgres: Option<PostgresConfig>,
    /// Namespace that holds every power-user workspace.
    pub workspace_namespace: String,
    /// How long a user's memberships are trusted before the provider is
    /// asked again.
    pub group_refresh: Duration,
    /// Periodic resync tick of the reconcile controller.
    pub reconcile_interval: Duration,
    pub reconcile_batch_size: usize,
    pub provider_timeout: Duration,
    /// New users with these emails start as Owner.
    pub owner_emails: Vec<String>,
    /// New users with these emails start as Admin.
    pub admin_emails: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            metrics_bind: SocketAddr::from(([0, 0, 0, 0], 9090)),
            storage: StorageBackend::Memory,
            postgres: None,
            workspace_namespace: DEFAULT_WORKSPACE_NAMESPACE.to_string(),
            group_refresh: Duration::from_secs(DEFAULT_GROUP_REFRESH_SECS),
            reconcile_interval: Duration::from_millis(DEFAULT_RECONCILE_INTERVAL_MS),
            reconcile_batch_size: DEFAULT_RECONCILE_BATCH_SIZE,
            provider_timeout: Duration::from_millis(DEFAULT_PROVIDER_TIMEOUT_MS),
            owner_emails: Vec::new(),
            admin_emails: Vec::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PostgresConfigOverride {
    url: Option<String>,
    max_connections: Option<u32>,
    connect_timeout_ms: Option<u64>,
    acquire_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct GatewayConfigOverride {
    bind_addr: Option<String>,
    metrics_bind: Option<String>,
    storage: Option<StorageBackend>,
    postgres: Option<PostgresConfigOverride>,
    workspace_namespace: Option<String>,
    group_refresh_secs: Option<u64>,
    reconcile_interval_ms: Option<u64>,
    reconcile_batch_size: Option<usize>,
    provider_timeout_ms: Option<u64>,
    owner_emails: Option<Vec<String>>,
    admin_emails: Option<Vec<String>>,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr = env_or("GATEHOUSE_BIND", DEFAULT_BIND)
            .parse()
            .with_context(|| "parse GATEHOUSE_BIND")?;
        let metrics_bind = env_or("GATEHOUSE_METRICS_BIND", DEFAULT_METRICS_BIND)
            .parse()
            .with_context(|| "parse GATEHOUSE_METRICS_BIND")?;
        let storage = env_or("GATEHOUSE_STORAGE", "memory")
            .parse()
            .with_context(|| "parse GATEHOUSE_STORAGE")?;
        let postgres = match std::env::var("GATEHOUSE_POSTGRES_URL") {
            Ok(url) => Some(PostgresConfig {
                url,
                max_connections: parse_env(
                    "GATEHOUSE_POSTGRES_MAX_CONNECTIONS",
                    DEFAULT_PG_MAX_CONNECTIONS,
                )?,
                connect_timeout_ms: DEFAULT_PG_CONNECT_TIMEOUT_MS,
                acquire_timeout_ms: DEFAULT_PG_ACQUIRE_TIMEOUT_MS,
            }),
            Err(_) => None,
        };
        let workspace_namespace =
            env_or("GATEHOUSE_WORKSPACE_NAMESPACE", DEFAULT_WORKSPACE_NAMESPACE);
        let group_refresh = Duration::from_secs(parse_env(
            "GATEHOUSE_GROUP_REFRESH_SECS",
            DEFAULT_GROUP_REFRESH_SECS,
        )?);
        let reconcile_interval = Duration::from_millis(parse_env(
            "GATEHOUSE_RECONCILE_INTERVAL_MS",
            DEFAULT_RECONCILE_INTERVAL_MS,
        )?);
        let provider_timeout = Duration::from_millis(parse_env(
            "GATEHOUSE_PROVIDER_TIMEOUT_MS",
            DEFAULT_PROVIDER_TIMEOUT_MS,
        )?);
        Ok(Self {
            bind_addr,
            metrics_bind,
            storage,
            postgres,
            workspace_namespace,
            group_refresh,
            reconcile_interval,
            reconcile_batch_size: DEFAULT_RECONCILE_BATCH_SIZE,
            provider_timeout,
            owner_emails: email_list(std::env::var("GATEHOUSE_OWNER_EMAILS").ok()),
            admin_emails: email_list(std::env::var("GATEHOUSE_ADMIN_EMAILS").ok()),
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("GATEHOUSE_CONFIG") {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read GATEHOUSE_CONFIG: {path}"))?;
            let override_cfg: GatewayConfigOverride =
                serde_yaml::from_str(&contents).with_context(|| "parse gateway config yaml")?;
            config.apply(override_cfg)?;
        }
        Ok(config)
    }

    fn apply(&mut self, override_cfg: GatewayConfigOverride) -> Result<()> {
        if let Some(value) = override_cfg.bind_addr {
            self.bind_addr = value.parse().with_context(|| "parse bind_addr")?;
        }
        if let Some(value) = override_cfg.metrics_bind {
            self.metrics_bind = value.parse().with_context(|| "parse metrics_bind")?;
        }
        if let Some(value) = override_cfg.storage {
            self.storage = value;
        }
        if let Some(pg) = override_cfg.postgres {
            let base = self.postgres.take();
            let url = pg
                .url
                .or_else(|| base.as_ref().map(|cfg| cfg.url.clone()))
                .context("postgres.url missing in config override")?;
            self.postgres = Some(PostgresConfig {
                url,
                max_connections: pg
                    .max_connections
                    .or(base.as_ref().map(|cfg| cfg.max_connections))
                    .unwrap_or(DEFAULT_PG_MAX_CONNECTIONS),
                connect_timeout_ms: pg
                    .connect_timeout_ms
                    .or(base.as_ref().map(|cfg| cfg.connect_timeout_ms))
                    .unwrap_or(DEFAULT_PG_CONNECT_TIMEOUT_MS),
                acquire_timeout_ms: pg
                    .acquire_timeout_ms
                    .or(base.as_ref().map(|cfg| cfg.acquire_timeout_ms))
                    .unwrap_or(DEFAULT_PG_ACQUIRE_TIMEOUT_MS),
            });
        }
        if let Some(value) = override_cfg.workspace_namespace {
            self.workspace_namespace = value;
        }
        if let Some(value) = override_cfg.group_refresh_secs {
            self.group_refresh = Duration::from_secs(value);
        }
        if let Some(value) = override_cfg.reconcile_interval_ms {
            self.reconcile_interval = Duration::from_millis(value);
        }
        if let Some(value) = override_cfg.reconcile_batch_size {
            self.reconcile_batch_size = value.max(1);
        }
        if let Some(value) = override_cfg.provider_timeout_ms {
            self.provider_timeout = Duration::from_millis(value);
        }
        if let Some(value) = override_cfg.owner_emails {
            self.owner_emails = normalize_emails(value);
        }
        if let Some(value) = override_cfg.admin_emails {
            self.admin_emails = normalize_emails(value);
        }
        Ok(())
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(value) => value.parse().with_context(|| format!("parse {key}")),
        Err(_) => Ok(default),
    }
}

fn email_list(raw: Option<String>) -> Vec<String> {
    raw.map(|value| normalize_emails(value.split(',').map(str::to_string).collect()))
        .unwrap_or_default()
}

fn normalize_emails(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|email| email.trim().to_ascii_lowercase())
        .filter(|email| !email.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    struct EnvGuard {
        key: &'static str,
        prev: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &'static str, value: &str) -> Self {
            let prev = std::env::var(key).ok();
            unsafe {
                std::env::set_var(key, value);
            }
            Self { key, prev }
        }

        fn unset(key: &'static str) -> Self {
            let prev = std::env::var(key).ok();
            unsafe {
                std::env::remove_var(key);
            }
            Self { key, prev }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.prev {
                Some(value) => unsafe {
                    std::env::set_var(self.key, value);
                },
                None => unsafe {
                    std::env::remove_var(self.key);
                },
            }
        }
    }

    #[test]
    #[serial]
    fn from_env_uses_defaults() {
        let _g = [
            EnvGuard::unset("GATEHOUSE_BIND"),
            EnvGuard::unset("GATEHOUSE_STORAGE"),
            EnvGuard::unset("GATEHOUSE_POSTGRES_URL"),
            EnvGuard::unset("GATEHOUSE_GROUP_REFRESH_SECS"),
            EnvGuard::unset("GATEHOUSE_OWNER_EMAILS"),
        ];
        let config = GatewayConfig::from_env().expect("config");
        assert_eq!(config.bind_addr, DEFAULT_BIND.parse().expect("addr"));
        assert_eq!(config.storage, StorageBackend::Memory);
        assert!(config.postgres.is_none());
        assert_eq!(config.group_refresh, Duration::from_secs(600));
        assert!(config.owner_emails.is_empty());
    }

    #[test]
    #[serial]
    fn from_env_reads_overrides() {
        let _g = [
            EnvGuard::set("GATEHOUSE_STORAGE", "postgres"),
            EnvGuard::set("GATEHOUSE_POSTGRES_URL", "postgres://localhost/gatehouse"),
            EnvGuard::set("GATEHOUSE_POSTGRES_MAX_CONNECTIONS", "3"),
            EnvGuard::set("GATEHOUSE_GROUP_REFRESH_SECS", "60"),
            EnvGuard::set("GATEHOUSE_OWNER_EMAILS", " Root@Example.com ,,ops@example.com"),
        ];
        let config = GatewayConfig::from_env().expect("config");
        assert_eq!(config.storage, StorageBackend::Postgres);
        let pg = config.postgres.expect("postgres");
        assert_eq!(pg.max_connections, 3);
        assert_eq!(config.group_refresh, Duration::from_secs(60));
        assert_eq!(
            config.owner_emails,
            vec!["root@example.com".to_string(), "ops@example.com".to_string()]
        );
    }

    #[test]
    #[serial]
    fn from_env_rejects_bad_values() {
        let _g = EnvGuard::set("GATEHOUSE_RECONCILE_INTERVAL_MS", "soon");
        let err = GatewayConfig::from_env().expect_err("bad interval");
        assert!(err.to_string().contains("GATEHOUSE_RECONCILE_INTERVAL_MS"));
    }

    #[test]
    #[serial]
    fn yaml_override_applies_on_top_of_env() {
        let mut file = tempfile_path("gateway-config.yaml");
        writeln!(
            file.1,
            "storage: postgres\npostgres:\n  url: postgres://yaml/db\nworkspace_namespace: acme\nadmin_emails: [Admin@Example.com]\nreconcile_interval_ms: 250"
        )
        .expect("write yaml");
        let _g1 = EnvGuard::set("GATEHOUSE_CONFIG", file.0.to_str().expect("utf8 path"));
        let _g2 = EnvGuard::unset("GATEHOUSE_POSTGRES_URL");
        let config = GatewayConfig::from_env_or_yaml().expect("config");
        assert_eq!(config.storage, StorageBackend::Postgres);
        assert_eq!(config.postgres.expect("pg").url, "postgres://yaml/db");
        assert_eq!(config.workspace_namespace, "acme");
        assert_eq!(config.admin_emails, vec!["admin@example.com".to_string()]);
        assert_eq!(config.reconcile_interval, Duration::from_millis(250));
        let _ = std::fs::remove_file(&file.0);
    }

    fn tempfile_path(name: &str) -> (std::path::PathBuf, std::fs::File) {
        let path = std::env::temp_dir().join(format!("{}-{name}", uuid::Uuid::new_v4()));
        let file = std::fs::File::create(&path).expect("create temp file");
        (path, file)
    }

    #[test]
    fn storage_backend_parses_aliases() {
        assert_eq!("Memory".parse::<StorageBackend>().expect("memory"), StorageBackend::Memory);
        assert_eq!(
            "postgresql".parse::<StorageBackend>().expect("pg"),
            StorageBackend::Postgres
        );
        assert!("sqlite".parse::<StorageBackend>().is_err());
    }
}
