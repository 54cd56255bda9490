use std::fmt;
use std::io::{BufRead, Write};

use crate::error::{DispatchError, Result};

/// Marker substituted for the raw credential in every echoed or logged
/// command line.
pub const REDACTED: &str = "***";

/// A password-style credential for remote login.
///
/// The raw value is only reachable through [`Credential::reveal`], which is
/// called at exactly one place: when assembling the argv of the spawned
/// login wrapper. `Debug` output is redacted so the value cannot leak
/// through logging or error formatting.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// The raw secret. Never interpolate this into anything that gets
    /// logged, persisted, or echoed into a job log.
    pub fn reveal(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({REDACTED})")
    }
}

/// Where the credential for password-based login comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CredentialSource {
    /// Key-based login, no password needed.
    #[default]
    None,
    /// Read from the named environment variable.
    Env(String),
    /// Ask on the controlling terminal with echo disabled.
    Prompt,
}

impl CredentialSource {
    pub fn resolve(&self) -> Result<Option<Credential>> {
        match self {
            CredentialSource::None => Ok(None),
            CredentialSource::Env(var) => match std::env::var(var) {
                Ok(value) => Ok(Some(Credential::new(value))),
                Err(_) => Err(DispatchError::Credential(format!(
                    "environment variable {var} is not set"
                ))),
            },
            CredentialSource::Prompt => prompt_password("Password: ").map(Some),
        }
    }
}

/// Read a password from stdin with terminal echo disabled.
///
/// Falls back to an echoing read when stdin is not a terminal (piped
/// input, CI), which matches how the submission tools themselves behave.
pub fn prompt_password(prompt: &str) -> Result<Credential> {
    use nix::sys::termios::{tcgetattr, tcsetattr, LocalFlags, SetArg};

    let stdin = std::io::stdin();
    eprint!("{prompt}");
    let _ = std::io::stderr().flush();

    let saved = tcgetattr(&stdin).ok();
    if let Some(saved) = &saved {
        let mut raw = saved.clone();
        raw.local_flags &= !LocalFlags::ECHO;
        tcsetattr(&stdin, SetArg::TCSANOW, &raw)
            .map_err(|e| DispatchError::Credential(format!("cannot disable echo: {e}")))?;
    } else {
        tracing::warn!("stdin is not a terminal, password input will be echoed");
    }

    let mut line = String::new();
    let read = stdin.lock().read_line(&mut line);

    if let Some(saved) = &saved {
        let _ = tcsetattr(&stdin, SetArg::TCSANOW, saved);
        eprintln!();
    }

    read.map_err(DispatchError::Io)?;
    let secret = line.trim_end_matches(['\r', '\n']).to_string();
    Ok(Credential::new(secret))
}
