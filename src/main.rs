//! Command-line admin client for a PKI secrets engine.
//!
//! Usage:
//!   pkictl issuers list
//!   pkictl -c ./pkictl.conf generate root internal -p common_name=example.com
//!   pkictl roles issue web -p common_name=www.example.com
//!   pkictl parse ./ca.pem

mod cert;
mod client;
mod config;
mod error;
mod gateway;
mod tls;
mod util;

#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use log::{error, info};
use serde_json::{Map, Value};

use client::SecretsClient;
use gateway::ca::{CaAction, CaCertificateGateway, CaSubmission, CaType, GenerationType};
use gateway::issuer::{CertFormat, IssuerGateway};
use gateway::key::{KeyGateway, KeyRecord};
use gateway::role::{RoleGateway, RoleRecord};
use gateway::{RecordGateway, RecordStore};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "pkictl", about = "Admin client for a PKI secrets engine")]
struct Cli {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", default_value = config::DEFAULT_PATH)]
    config: PathBuf,

    /// API address, overriding `addr` from the config file.
    #[arg(long)]
    addr: Option<String>,

    /// Engine mount path, overriding `mount` from the config file.
    #[arg(long)]
    mount: Option<String>,

    /// Namespace, overriding `namespace` from the config file.
    #[arg(long)]
    namespace: Option<String>,

    /// Debug logging.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the metadata of a local PEM or DER certificate (`-` reads stdin).
    Parse { file: PathBuf },

    /// Import a PEM bundle (CA certificate and key).
    Upload {
        file: PathBuf,
        /// Use the multi-issuer import endpoint.
        #[arg(long)]
        issuer: bool,
    },

    /// Generate a root CA or an intermediate CSR.
    Generate {
        ca_type:  CaType,
        gen_type: GenerationType,
        /// Request parameter, repeatable.
        #[arg(short = 'p', long = "param", value_parser = parse_param)]
        params:   Vec<(String, String)>,
    },

    /// Sign an intermediate CSR with the mount's root.
    SignIntermediate {
        csr: PathBuf,
        #[arg(short = 'p', long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },

    /// Install a signed intermediate certificate.
    SetSigned { file: PathBuf },

    #[command(subcommand)]
    Issuers(IssuerCommand),

    #[command(subcommand)]
    Keys(KeyCommand),

    #[command(subcommand)]
    Roles(RoleCommand),
}

#[derive(Debug, Subcommand)]
enum IssuerCommand {
    List,
    Show { id: String },
    /// Change writable issuer attributes (`issuer_name`, `usage`, ...).
    Update {
        id: String,
        #[arg(short = 'p', long = "param", value_parser = parse_param, required = true)]
        params: Vec<(String, String)>,
    },
    /// Download the issuer certificate.
    Download {
        id: String,
        #[arg(long, default_value = "pem")]
        format: CertFormat,
        /// Output file; stdout when omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Subcommand)]
enum KeyCommand {
    List,
    Rename { id: String, name: String },
}

#[derive(Debug, Subcommand)]
enum RoleCommand {
    List,
    Show { name: String },
    /// Create or replace a role.
    Write {
        name: String,
        #[arg(short = 'p', long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
    Delete { name: String },
    /// Issue a certificate and key from a role.
    Issue {
        name: String,
        #[arg(short = 'p', long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
    /// Sign a CSR under a role.
    Sign {
        name: String,
        csr: PathBuf,
        #[arg(short = 'p', long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
}

fn parse_param(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
        _ => Err(format!("expected key=value, got {s:?}")),
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let cfg = match config::load_config(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("pkictl: config error: {e}");
            process::exit(1);
        }
    };
    let cfg = config::ClientConfig {
        addr:      cli.addr.clone().unwrap_or(cfg.addr),
        mount:     cli.mount.as_deref().map(|m| m.trim_matches('/').to_string()).unwrap_or(cfg.mount),
        namespace: cli.namespace.clone().or(cfg.namespace),
        ..cfg
    };
    if let Err(e) = config::validate_config(&cfg) {
        eprintln!("pkictl: config validation: {e}");
        process::exit(1);
    }

    if let Err(e) = setup_logging(cfg.log_syslog, cli.verbose) {
        eprintln!("pkictl: {e:#}");
        process::exit(1);
    }

    if let Err(e) = run(cli.command, &cfg).await {
        match e.downcast_ref::<error::PkiError>().and_then(error::PkiError::status) {
            Some(status) => error!("server rejected request ({status}): {e:#}"),
            None => error!("{e:#}"),
        }
        eprintln!("pkictl: {e:#}");
        process::exit(1);
    }
}

async fn run(command: Command, cfg: &config::ClientConfig) -> anyhow::Result<()> {
    let connect = || -> anyhow::Result<(SecretsClient, Arc<RecordStore>)> {
        let client = SecretsClient::new(cfg).context("building API client")?;
        info!("{} mount {}", cfg.addr, cfg.mount);
        Ok((client, Arc::new(RecordStore::new())))
    };

    match command {
        Command::Parse { file } => print_json(parse_local(&file)?.to_json_map()),

        Command::Upload { file, issuer } => {
            let (client, store) = connect()?;
            let ca = CaCertificateGateway::new(client, &cfg.mount, store);
            let mut record = ca.draft();
            record.pem_bundle = Some(read_text(&file)?);
            submit_ca(&ca, record, CaAction::Upload { use_issuer: issuer }).await
        }

        Command::Generate { ca_type, gen_type, params } => {
            let (client, store) = connect()?;
            let ca = CaCertificateGateway::new(client, &cfg.mount, store);
            let mut record = ca.draft();
            record.ca_type = ca_type;
            record.gen_type = gen_type;
            record.params = params_map(params);
            submit_ca(&ca, record, CaAction::Generate).await
        }

        Command::SignIntermediate { csr, params } => {
            let (client, store) = connect()?;
            let ca = CaCertificateGateway::new(client, &cfg.mount, store);
            let mut record = ca.draft();
            record.params = params_map(params);
            record.params.insert("csr".into(), Value::String(read_text(&csr)?));
            submit_ca(&ca, record, CaAction::SignIntermediate).await
        }

        Command::SetSigned { file } => {
            let (client, store) = connect()?;
            let ca = CaCertificateGateway::new(client, &cfg.mount, store);
            let mut record = ca.draft();
            record.certificate = Some(read_text(&file)?);
            submit_ca(&ca, record, CaAction::SetSignedIntermediate).await
        }

        Command::Issuers(sub) => {
            let (client, store) = connect()?;
            let issuers = IssuerGateway::new(client, &cfg.mount, store);
            match sub {
                IssuerCommand::List => {
                    let list: Vec<Value> =
                        issuers.list().await?.iter().map(|i| Value::Object(i.to_fields())).collect();
                    print_json(list)
                }
                IssuerCommand::Show { id } => {
                    let issuer = issuers.find(&id).await?;
                    print_json(with_rfc3339(issuer.to_fields()))
                }
                IssuerCommand::Update { id, params } => {
                    let mut issuer = issuers.find(&id).await?;
                    issuer.fields.extend(params_map(params));
                    let updated = issuers.update(&issuer).await?;
                    print_json(updated.to_fields())
                }
                IssuerCommand::Download { id, format, output } => {
                    let body = issuers
                        .fetch_cert_by_format(&id, format)
                        .await
                        .ok_or_else(|| anyhow!("{format} certificate of issuer {id} is not available"))?;
                    util::write_output(output.as_deref(), &body)
                        .context("writing certificate")?;
                    Ok(())
                }
            }
        }

        Command::Keys(sub) => {
            let (client, store) = connect()?;
            let keys = KeyGateway::new(client, &cfg.mount, store);
            match sub {
                KeyCommand::List => {
                    let list: Vec<Value> =
                        keys.list().await?.iter().map(|k| Value::Object(k.to_fields())).collect();
                    print_json(list)
                }
                KeyCommand::Rename { id, name } => {
                    let mut draft = KeyRecord { key_id: id, ..Default::default() };
                    draft.fields.insert("key_name".into(), Value::String(name));
                    print_json(keys.submit(&draft).await?)
                }
            }
        }

        Command::Roles(sub) => {
            let (client, store) = connect()?;
            let roles = RoleGateway::new(client, &cfg.mount, store);
            match sub {
                RoleCommand::List => {
                    let list: Vec<Value> =
                        roles.list().await?.iter().map(|r| Value::Object(r.to_fields())).collect();
                    print_json(list)
                }
                RoleCommand::Show { name } => print_json(roles.find(&name).await?.to_fields()),
                RoleCommand::Write { name, params } => {
                    let draft = RoleRecord { name, fields: params_map(params) };
                    print_json(roles.submit(&draft).await?)
                }
                RoleCommand::Delete { name } => {
                    roles.delete(&name).await?;
                    Ok(())
                }
                RoleCommand::Issue { name, params } => {
                    print_json(roles.issue(&name, params_map(params)).await?)
                }
                RoleCommand::Sign { name, csr, params } => {
                    let csr = read_text(&csr)?;
                    print_json(roles.sign(&name, &csr, params_map(params)).await?)
                }
            }
        }
    }
}

/// Metadata of a local PEM, base64 or DER certificate file.
fn parse_local(file: &std::path::Path) -> anyhow::Result<cert::ParsedCertificateMetadata> {
    let raw = util::read_input_bytes(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let meta = match String::from_utf8(raw) {
        Ok(text) => cert::extract(&text),
        Err(e) => cert::extract_der(e.as_bytes()),
    };
    meta.context("parsing certificate")
}

async fn submit_ca(
    ca:     &CaCertificateGateway,
    record: gateway::ca::CaCertificateRecord,
    action: CaAction,
) -> anyhow::Result<()> {
    let out = ca
        .submit(&CaSubmission { record, action })
        .await
        .with_context(|| format!("{action:?} failed"))?;
    print_json(out)
}

fn read_text(path: &std::path::Path) -> anyhow::Result<String> {
    util::read_input(path).with_context(|| format!("reading {}", path.display()))
}

fn params_map(params: Vec<(String, String)>) -> Map<String, Value> {
    params.into_iter().map(|(k, v)| (k, Value::String(v))).collect()
}

/// Add `<field>_rfc3339` next to each unix-seconds validity field.
fn with_rfc3339(mut record: Map<String, Value>) -> Map<String, Value> {
    for field in ["not_valid_before", "not_valid_after"] {
        let rendered = record
            .get(field)
            .and_then(Value::as_i64)
            .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
            .map(|t| t.to_rfc3339());
        if let Some(rendered) = rendered {
            record.insert(format!("{field}_rfc3339"), Value::String(rendered));
        }
    }
    record
}

fn print_json(value: impl serde::Serialize) -> anyhow::Result<()> {
    let mut text = serde_json::to_string_pretty(&value)?;
    text.push('\n');
    util::write_output(None, text.as_bytes())?;
    Ok(())
}

// ── Logging setup ─────────────────────────────────────────────────────────────

fn setup_logging(use_syslog: bool, verbose: bool) -> anyhow::Result<()> {
    let level = if verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info };
    if use_syslog {
        let formatter = syslog::Formatter3164 {
            facility: syslog::Facility::LOG_USER,
            hostname: None,
            process:  "pkictl".into(),
            pid:      process::id(),
        };
        let logger = syslog::unix(formatter)
            .map_err(|e| anyhow!("syslog connect failed: {e}"))?;
        log::set_boxed_logger(Box::new(syslog::BasicLogger::new(logger)))
            .map(|()| log::set_max_level(level))
            .map_err(|e| anyhow!("set_logger: {e}"))?;
    } else {
        env_logger::Builder::new()
            .filter_level(level)
            .parse_default_env()
            .init();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn params_split_on_first_equals() {
        assert_eq!(parse_param("ttl=87600h"), Ok(("ttl".into(), "87600h".into())));
        assert_eq!(
            parse_param("alt_names=a.example.com,b=c"),
            Ok(("alt_names".into(), "a.example.com,b=c".into()))
        );
        assert!(parse_param("=x").is_err());
        assert!(parse_param("novalue").is_err());
    }

    #[test]
    fn validity_rendered_as_rfc3339() {
        let record = util::object_or_empty(json!({ "not_valid_after": 0, "issuer_name": "x" }));
        let out = with_rfc3339(record);
        assert_eq!(out["not_valid_after_rfc3339"], json!("1970-01-01T00:00:00+00:00"));
        assert!(out.get("not_valid_before_rfc3339").is_none());
    }

    #[test]
    fn cli_parses_generate() {
        let cli = Cli::try_parse_from([
            "pkictl", "--mount", "pki-int", "generate", "intermediate", "exported", "-p", "common_name=int",
        ])
        .unwrap();
        assert_eq!(cli.mount.as_deref(), Some("pki-int"));
        match cli.command {
            Command::Generate { ca_type, gen_type, params } => {
                assert_eq!(ca_type, CaType::Intermediate);
                assert_eq!(gen_type, GenerationType::Exported);
                assert_eq!(params, vec![("common_name".to_string(), "int".to_string())]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn cli_parses_role_sign() {
        let cli = Cli::try_parse_from(["pkictl", "roles", "sign", "web", "./req.csr", "-p", "ttl=24h"]).unwrap();
        match cli.command {
            Command::Roles(RoleCommand::Sign { name, csr, params }) => {
                assert_eq!(name, "web");
                assert_eq!(csr, PathBuf::from("./req.csr"));
                assert_eq!(params, vec![("ttl".to_string(), "24h".to_string())]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[tokio::test]
    async fn parse_runs_without_an_api_client() {
        let cfg = config::ClientConfig {
            token_file: Some(PathBuf::from("/nonexistent/pkictl-token")),
            ..config::ClientConfig::default()
        };
        assert!(SecretsClient::new(&cfg).is_err());

        let file = PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/testdata/root.pem"));
        run(Command::Parse { file }, &cfg).await.unwrap();
        assert!(run(Command::Keys(KeyCommand::List), &cfg).await.is_err());
    }
}
