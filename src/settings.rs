use miette::{IntoDiagnostic, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub server: Server,
    pub database: Database,
    pub spicedb: SpiceDb,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub host: String,
    pub port: u16,
    /// Per-request deadline; requests that outlive it answer 422.
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Database {
    /// SeaORM/SQLx connection string, e.g., sqlite://warden.db?mode=rwc
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpiceDb {
    /// Namespace prefixed to every schema definition, e.g. `warden/tenant`.
    pub namespace: String,
    /// Policy document compiled at startup.
    pub policy_file: PathBuf,
    /// Per-call deadline for relation-engine requests.
    pub call_timeout_ms: u64,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7602,
            request_timeout_ms: 30_000,
        }
    }
}

impl Default for Database {
    fn default() -> Self {
        Self {
            url: "sqlite://warden.db?mode=rwc".to_string(),
        }
    }
}

impl Default for SpiceDb {
    fn default() -> Self {
        Self {
            namespace: "warden".to_string(),
            policy_file: PathBuf::from("policy.yaml"),
            call_timeout_ms: 5_000,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: Server::default(),
            database: Database::default(),
            spicedb: SpiceDb::default(),
        }
    }
}

impl Settings {
    pub fn load(path: &str) -> Result<Self> {
        let mut builder = config::Config::builder()
            .set_default("server.host", Server::default().host)
            .into_diagnostic()?
            .set_default("server.port", i64::from(Server::default().port))
            .into_diagnostic()?
            .set_default(
                "server.request_timeout_ms",
                Server::default().request_timeout_ms as i64,
            )
            .into_diagnostic()?
            .set_default("database.url", Database::default().url)
            .into_diagnostic()?
            .set_default("spicedb.namespace", SpiceDb::default().namespace)
            .into_diagnostic()?
            .set_default(
                "spicedb.policy_file",
                SpiceDb::default().policy_file.to_string_lossy().to_string(),
            )
            .into_diagnostic()?
            .set_default(
                "spicedb.call_timeout_ms",
                SpiceDb::default().call_timeout_ms as i64,
            )
            .into_diagnostic()?;

        // Optional file
        if Path::new(path).exists() {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Environment overrides: WARDEN__SERVER__PORT=9090, etc.
        builder =
            builder.add_source(config::Environment::with_prefix("WARDEN").separator("__"));

        let cfg = builder.build().into_diagnostic()?;
        let settings: Settings = cfg.try_deserialize().into_diagnostic()?;

        Ok(settings)
    }
}
