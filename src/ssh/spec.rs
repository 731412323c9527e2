//! Connection string parsing.
//!
//! Turns `[user[:pass]@]host[:port]` into a [`DialSpec`] and `host:port`
//! into a forwarding [`Target`]. Anything that could end up being read as a
//! command-line flag by the ssh client is rejected here, before it can reach
//! a command line.

use std::fmt;

use url::{Host, Url};

use crate::error::{HopError, Result, SpecErrorReason};

/// Port ssh uses when none is given.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Parsed jump host connection string.
#[derive(Clone, PartialEq, Eq)]
pub struct DialSpec {
    pub user: Option<String>,
    pub pass: Option<String>,
    pub host: String,
    pub port: Option<u16>,
}

impl DialSpec {
    /// The port to pass to the client, or `None` when ssh's default applies.
    pub fn explicit_port(&self) -> Option<u16> {
        self.port.filter(|port| *port != DEFAULT_SSH_PORT)
    }

    /// `user@host` or `host`, as handed to the client in a single argument.
    pub fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }
}

impl fmt::Display for DialSpec {
    /// Renders the spec without the password.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.destination())?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        Ok(())
    }
}

impl fmt::Debug for DialSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DialSpec")
            .field("user", &self.user)
            .field("pass", &self.pass.as_ref().map(|_| "***"))
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}

/// Endpoint the jump host should relay to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Authority components shared by both parsers.
struct Authority {
    user: Option<String>,
    pass: Option<String>,
    host: String,
    port: Option<u16>,
}

/// Parse a jump host spec of the form `[user[:pass]@]host[:port]`.
pub fn parse(text: &str) -> Result<DialSpec> {
    let shown = redact(text);
    let url = parse_url(&format!("ssh://{}", text), &shown)?;
    let authority = authority(&url, &shown)?;

    if let Some(user) = &authority.user {
        if user.starts_with('-') {
            return Err(HopError::invalid_spec(SpecErrorReason::UnsafeUser, shown));
        }
    }

    if let Some(pass) = &authority.pass {
        if pass.starts_with('-') {
            return Err(HopError::invalid_spec(SpecErrorReason::UnsafePass, shown));
        }
    }

    // `user@-host` renders as one argument starting with the user name
    if authority.user.is_none() && authority.host.starts_with('-') {
        return Err(HopError::invalid_spec(SpecErrorReason::UnsafeHost, shown));
    }

    Ok(DialSpec {
        user: authority.user,
        pass: authority.pass,
        host: authority.host,
        port: authority.port,
    })
}

/// Parse a forwarding target: `host:port` or `tcp://host:port`.
///
/// Credentials are not accepted and the port is required.
pub fn parse_target(text: &str) -> Result<Target> {
    let shown = redact(text);
    let url = if text.contains("://") {
        let url = parse_url(text, &shown)?;
        if url.scheme() != "tcp" {
            return Err(HopError::invalid_spec(SpecErrorReason::Malformed, shown));
        }
        url
    } else {
        parse_url(&format!("tcp://{}", text), &shown)?
    };

    let authority = authority(&url, &shown)?;

    if authority.user.is_some() || authority.pass.is_some() {
        return Err(HopError::invalid_spec(SpecErrorReason::Malformed, shown));
    }

    if authority.host.starts_with('-') {
        return Err(HopError::invalid_spec(SpecErrorReason::UnsafeHost, shown));
    }

    let port = authority
        .port
        .ok_or_else(|| HopError::invalid_spec(SpecErrorReason::InvalidPort, shown))?;

    Ok(Target {
        host: authority.host,
        port,
    })
}

fn parse_url(candidate: &str, input: &str) -> Result<Url> {
    Url::parse(candidate).map_err(|e| {
        let reason = match e {
            url::ParseError::InvalidPort => SpecErrorReason::InvalidPort,
            _ => SpecErrorReason::Malformed,
        };
        tracing::trace!("Rejected connection string {}: {}", input, e);
        HopError::invalid_spec(reason, input)
    })
}

fn authority(url: &Url, input: &str) -> Result<Authority> {
    let malformed = || HopError::invalid_spec(SpecErrorReason::Malformed, input);

    if !url.path().is_empty() || url.query().is_some() || url.fragment().is_some() {
        return Err(malformed());
    }

    let host = match url.host() {
        Some(Host::Domain(domain)) => decode(domain).ok_or_else(malformed)?,
        Some(Host::Ipv4(addr)) => addr.to_string(),
        Some(Host::Ipv6(addr)) => addr.to_string(),
        None => return Err(malformed()),
    };
    if host.is_empty() {
        return Err(malformed());
    }

    let user = match url.username() {
        "" => None,
        user => Some(decode(user).ok_or_else(malformed)?),
    };
    let pass = match url.password() {
        None | Some("") => None,
        Some(pass) => Some(decode(pass).ok_or_else(malformed)?),
    };

    let port = match url.port() {
        Some(0) => return Err(HopError::invalid_spec(SpecErrorReason::InvalidPort, input)),
        port => port,
    };

    Ok(Authority {
        user,
        pass,
        host,
        port,
    })
}

/// Mask the password of `user:pass@host` style input for error messages.
fn redact(text: &str) -> String {
    let start = text.find("://").map(|i| i + 3).unwrap_or(0);
    let Some(at) = text[start..].rfind('@').map(|i| i + start) else {
        return text.to_string();
    };
    match text[start..at].find(':') {
        Some(colon) => format!("{}:***{}", &text[..start + colon], &text[at..]),
        None => text.to_string(),
    }
}

fn decode(component: &str) -> Option<String> {
    urlencoding::decode(component).ok().map(|s| s.into_owned())
}
