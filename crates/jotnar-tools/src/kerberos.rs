//! Kerberos credential broker (spec §4.7 / C7).
//!
//! Grounded verbatim in `common/utils.py::extract_principal` and
//! `init_kerberos_ticket`: parse the keytab's principal via
//! `klist -k -K -e`, then only `kinit` if that principal isn't already
//! listed (non-expired) in the credentials cache named by `KRB5CCNAME`.

use regex::Regex;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum KerberosError {
    #[error("klist command failed: {0}")]
    KlistFailed(String),
    #[error("no valid key found in the keytab file")]
    NoKeyInKeytab,
    #[error("KRB5CCNAME environment variable is not set")]
    CcacheNotConfigured,
    #[error("kinit command failed: {0}")]
    KinitFailed(String),
    #[error("failed to extract principal from keytab file")]
    PrincipalExtractionFailed,
}

/// Lazily acquires and caches a ticket for the tools that need one
/// (lookaside upload, builder, spec §4.7). Holds no state beyond the
/// external credentials cache file; safe to construct per call.
pub struct KerberosBroker {
    keytab_file: Option<String>,
    ccache_file: String,
}

impl KerberosBroker {
    pub fn new(keytab_file: Option<String>, ccache_file: String) -> Self {
        Self {
            keytab_file,
            ccache_file,
        }
    }

    /// Returns the principal associated with a ready-to-use ticket,
    /// acquiring one via `kinit` only if the keytab's principal isn't
    /// already cached.
    pub async fn ensure_ticket(&self) -> Result<String, KerberosError> {
        let keytab_principal = match &self.keytab_file {
            Some(keytab_file) => Some(extract_principal(keytab_file).await?),
            None => None,
        };

        if self.ccache_file.is_empty() {
            return Err(KerberosError::CcacheNotConfigured);
        }

        let principals = if std::path::Path::new(&self.ccache_file).exists() {
            list_cached_principals().await?
        } else {
            Vec::new()
        };

        let Some(keytab_file) = &self.keytab_file else {
            return principals
                .into_iter()
                .next()
                .ok_or(KerberosError::NoKeyInKeytab);
        };
        let keytab_principal = keytab_principal.ok_or(KerberosError::PrincipalExtractionFailed)?;

        if principals.iter().any(|p| p == &keytab_principal) {
            tracing::info!(principal = %keytab_principal, "using existing cached Kerberos ticket");
            return Ok(keytab_principal);
        }

        kinit(keytab_file, &keytab_principal).await?;
        tracing::info!(principal = %keytab_principal, "initialized Kerberos ticket");
        Ok(keytab_principal)
    }
}

async fn extract_principal(keytab_file: &str) -> Result<String, KerberosError> {
    let output = Command::new("klist")
        .args(["-k", "-K", "-e", keytab_file])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| KerberosError::KlistFailed(e.to_string()))?;

    if !output.status.success() {
        return Err(KerberosError::KlistFailed(
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ));
    }

    let key_pattern = Regex::new(r"^\s*(\d+)\s+(\S+)\s+\((\S+)\)\s+\((\S+)\)$")
        .map_err(|e| KerberosError::KlistFailed(e.to_string()))?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    for line in stdout.lines() {
        if let Some(caps) = key_pattern.captures(line) {
            return Ok(caps[2].to_string());
        }
    }
    Err(KerberosError::NoKeyInKeytab)
}

async fn list_cached_principals() -> Result<Vec<String>, KerberosError> {
    let output = Command::new("klist")
        .arg("-l")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| KerberosError::KlistFailed(e.to_string()))?;

    if !output.status.success() {
        return Err(KerberosError::KlistFailed(
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout
        .lines()
        .filter(|line| !line.contains("Expired"))
        .filter_map(|line| line.split_whitespace().next())
        .filter(|token| token.contains('@'))
        .map(str::to_string)
        .collect())
}

async fn kinit(keytab_file: &str, principal: &str) -> Result<(), KerberosError> {
    let output = Command::new("kinit")
        .args(["-k", "-t", keytab_file, principal])
        .env("KRB5_TRACE", "/dev/stdout")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| KerberosError::KinitFailed(e.to_string()))?;

    if !output.status.success() {
        return Err(KerberosError::KinitFailed(
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_ccache_env_is_an_error() {
        let broker = KerberosBroker::new(None, String::new());
        let err = broker.ensure_ticket().await.unwrap_err();
        assert!(matches!(err, KerberosError::CcacheNotConfigured));
    }
}
