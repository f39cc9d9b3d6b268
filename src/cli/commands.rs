use crate::config::EnforcerConfig;
use crate::engine::Enforcer;
use crate::logging::{init_logging_with_config, LogConfig};
use crate::security::extractor::{classify, CredentialKind};
use crate::security::jwt::ParsedToken;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::PathBuf;

/// Command-line interface for the enforcer
#[derive(Parser)]
#[command(name = "enforcer")]
#[command(about = "Gateway credential enforcer", long_about = None)]
pub struct Cli {
    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load and validate a configuration file
    CheckConfig {
        /// Path to the YAML configuration
        file: PathBuf,
    },
    /// Decode a token without verifying it
    Inspect {
        /// The raw credential (a `Bearer ` prefix is accepted)
        token: String,

        /// Opaque key prefix used for classification
        #[arg(long, default_value = "chp_")]
        opaque_prefix: String,
    },
}

/// What `inspect` prints.
#[derive(Debug, Serialize)]
pub struct TokenReport {
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claims: Option<Map<String, Value>>,
}

/// Classify and decode `raw`. Signed tokens that fail to decode are an error.
pub fn inspect_token(raw: &str, opaque_prefix: &str) -> Result<TokenReport> {
    let raw = raw.trim();
    let raw = raw
        .strip_prefix("Bearer ")
        .or_else(|| raw.strip_prefix("bearer "))
        .unwrap_or(raw);
    let kind = classify(raw, opaque_prefix);
    let mut report = TokenReport {
        kind: format!("{kind:?}"),
        token_id: None,
        header: None,
        claims: None,
    };
    if kind == CredentialKind::SignedToken {
        let parsed = ParsedToken::parse(raw).map_err(|e| anyhow::anyhow!("{e}"))?;
        report.token_id = Some(parsed.token_id());
        report.header =
            Some(serde_json::to_value(&parsed.header).context("Failed to encode token header")?);
        report.claims = Some(parsed.claims);
    }
    Ok(report)
}

/// Parse arguments and run the selected command.
pub fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    init_logging_with_config(&LogConfig::from_env())?;
    match cli.command {
        Commands::CheckConfig { file } => {
            let config = EnforcerConfig::load(&file)?;
            let enforcer = Enforcer::from_config(config)
                .with_context(|| format!("Failed to build enforcer from {}", file.display()))?;
            println!(
                "✅ {} is valid: {} issuer(s), authenticators {:?}",
                file.display(),
                enforcer.issuers().len(),
                enforcer.chain().names()
            );
        }
        Commands::Inspect {
            token,
            opaque_prefix,
        } => {
            let report = inspect_token(&token, &opaque_prefix)?;
            let rendered =
                serde_json::to_string_pretty(&report).context("Failed to render token report")?;
            println!("{rendered}");
        }
    }
    Ok(())
}
