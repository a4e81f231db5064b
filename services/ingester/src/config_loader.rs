//! Run configuration loader.
//!
//! Reads the YAML run configuration, substituting environment variables
//! with `${VAR}` / `${VAR:-default}` syntax before parsing.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use ingestion::RunConfiguration;
use tracing::info;

/// Load, expand, parse and validate a run configuration file.
pub fn load_run_config<P: AsRef<Path>>(path: P) -> Result<RunConfiguration> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read run config from {:?}", path.as_ref()))?;

    parse_run_config(&content)
        .with_context(|| format!("Invalid run config in {:?}", path.as_ref()))
}

fn parse_run_config(content: &str) -> Result<RunConfiguration> {
    let expanded = expand_env_vars(content)?;

    let mut config: RunConfiguration =
        serde_yaml::from_str(&expanded).with_context(|| "Failed to parse run config YAML")?;

    config.ensure_run_id();
    config.validate()?;

    if let Some(remote) = &config.storage.remote {
        info!(
            user = %remote.user,
            namenode_uri = %remote.namenode_uri,
            "Remote storage configured; writing to the filesystem store"
        );
    }

    Ok(config)
}

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in YAML content
/// Supports ${VAR} and ${VAR:-default} syntax
fn expand_env_vars(content: &str) -> Result<String> {
    let mut result = String::new();
    let mut chars = content.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'

            let mut var_expr = String::new();
            let mut brace_count = 1;

            while brace_count > 0 {
                match chars.next() {
                    Some('{') => {
                        brace_count += 1;
                        var_expr.push('{');
                    }
                    Some('}') => {
                        brace_count -= 1;
                        if brace_count > 0 {
                            var_expr.push('}');
                        }
                    }
                    Some(c) => var_expr.push(c),
                    None => anyhow::bail!("Unclosed variable substitution: ${{{}", var_expr),
                }
            }

            let value = resolve_var_expr(&var_expr)?;
            result.push_str(&value);
        } else {
            result.push(ch);
        }
    }

    Ok(result)
}

/// Resolve variable expression (supports VAR and VAR:-default syntax)
fn resolve_var_expr(expr: &str) -> Result<String> {
    if let Some((var_name, default)) = expr.split_once(":-") {
        match std::env::var(var_name.trim()) {
            Ok(val) if !val.is_empty() => Ok(val),
            _ => Ok(default.to_string()),
        }
    } else {
        std::env::var(expr.trim()).with_context(|| format!("Environment variable {} not set", expr))
    }
}
