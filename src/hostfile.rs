//! Hostfile parsing for agent endpoints.
//!
//! One agent per line. Blank lines and lines whose first non-whitespace
//! character is `#` are ignored. Two forms are accepted:
//!
//! - Tab-delimited: `host<TAB>port<TAB>key=value<TAB>...` (port optional;
//!   defaults to 8000 if the second field is not all digits, in which case
//!   the second field is treated as the first tag).
//! - Whitespace-delimited, colon-in-host: `host[:port] key=value ...`
//!   (port defaults to 8000 when absent).

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::path::Path;

/// A single agent's network address plus optional metadata tags.
///
/// Immutable after construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub tags: BTreeMap<String, String>,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Endpoint {
            host: host.into(),
            port,
            tags: BTreeMap::new(),
        }
    }

    pub fn with_tags(
        host: impl Into<String>,
        port: u16,
        tags: BTreeMap<String, String>,
    ) -> Self {
        Endpoint {
            host: host.into(),
            port,
            tags,
        }
    }

    /// `http://{host}:{port}`.
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Re-render this endpoint as a tab-delimited hostfile line.
    ///
    /// Only used by tests exercising the parse/serialize round-trip
    /// property; the hostfile format itself has no canonical writer.
    pub fn to_hostfile_line(&self) -> String {
        let mut parts = vec![self.host.clone(), self.port.to_string()];
        for (k, v) in &self.tags {
            parts.push(format!("{k}={v}"));
        }
        parts.join("\t")
    }
}

const DEFAULT_PORT: u16 = 8000;

/// Parse a hostfile at `path` into an ordered list of [`Endpoint`]s.
pub fn parse_hostfile(path: impl AsRef<Path>) -> Result<Vec<Endpoint>> {
    let contents = std::fs::read_to_string(path.as_ref())
        .map_err(|e| Error::config(format!("cannot read hostfile: {e}")))?;
    parse_hostfile_str(&contents)
}

/// Parse hostfile contents already read into memory.
pub fn parse_hostfile_str(contents: &str) -> Result<Vec<Endpoint>> {
    let mut endpoints = Vec::new();
    for raw_line in contents.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        endpoints.push(parse_line(line)?);
    }
    Ok(endpoints)
}

fn parse_line(line: &str) -> Result<Endpoint> {
    if line.contains('\t') {
        parse_tab_delimited(line)
    } else {
        parse_whitespace_delimited(line)
    }
}

/// `host<TAB>port<TAB>key=value<TAB>...`
fn parse_tab_delimited(line: &str) -> Result<Endpoint> {
    let fields: Vec<&str> = line.split('\t').map(str::trim).filter(|f| !f.is_empty()).collect();
    if fields.is_empty() {
        return Err(Error::parse("empty hostfile line"));
    }
    let host = fields[0].to_string();

    let (port, tag_fields) = match fields.get(1) {
        Some(second) if second.chars().all(|c| c.is_ascii_digit()) && !second.is_empty() => {
            let port: u16 = second
                .parse()
                .map_err(|_| Error::parse(format!("invalid port: {second}")))?;
            (port, &fields[2..])
        }
        _ => (DEFAULT_PORT, &fields[1..]),
    };

    let tags = parse_tags(tag_fields);
    Ok(Endpoint::with_tags(host, port, tags))
}

/// `host[:port] key=value ...`
fn parse_whitespace_delimited(line: &str) -> Result<Endpoint> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let host_port = fields
        .first()
        .ok_or_else(|| Error::parse("empty hostfile line"))?;

    let (host, port) = match host_port.rsplit_once(':') {
        Some((host, port_str)) => {
            let port: u16 = port_str
                .parse()
                .map_err(|_| Error::parse(format!("invalid port: {port_str}")))?;
            (host.to_string(), port)
        }
        None => (host_port.to_string(), DEFAULT_PORT),
    };

    let tags = parse_tags(&fields[1..]);
    Ok(Endpoint::with_tags(host, port, tags))
}

fn parse_tags(fields: &[&str]) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();
    for field in fields {
        if let Some((key, value)) = field.split_once('=') {
            tags.insert(key.to_string(), value.to_string());
        }
    }
    tags
}
