// ABOUTME: Health check definitions parsed from application descriptors.
// ABOUTME: Validates method/port/path or literal URL plus the success literal.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckMethod {
    Http,
    Https,
}

impl fmt::Display for CheckMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckMethod::Http => write!(f, "http"),
            CheckMethod::Https => write!(f, "https"),
        }
    }
}

/// Where a check probes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckEndpoint {
    /// Assembled against the local host's name at probe time.
    HostPort {
        method: CheckMethod,
        port: u16,
        path: String,
    },
    /// Literal URL from the descriptor.
    Url(String),
}

/// One named health check: an endpoint plus the literal whose presence in
/// the response body counts as success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckSpec {
    pub endpoint: CheckEndpoint,
    pub success: String,
}

impl CheckSpec {
    /// Resolve the URL to probe.
    pub fn url(&self) -> String {
        match &self.endpoint {
            CheckEndpoint::Url(url) => url.clone(),
            CheckEndpoint::HostPort { method, port, path } => {
                let host = gethostname::gethostname().to_string_lossy().into_owned();
                format!("{method}://{host}:{port}{path}")
            }
        }
    }
}

/// Extract and validate every `check.<name>.<prop>` entry of a descriptor.
pub fn parse_checks(conf: &BTreeMap<String, String>) -> Result<BTreeMap<String, CheckSpec>> {
    let mut grouped: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    for (key, value) in conf {
        let Some(rest) = key.strip_prefix("check.") else {
            continue;
        };
        let Some((name, prop)) = rest.split_once('.') else {
            return Err(Error::Config(format!("invalid check key \"{key}\"")));
        };
        grouped
            .entry(name.to_string())
            .or_default()
            .insert(prop.to_string(), value.clone());
    }

    let mut checks = BTreeMap::new();
    for (name, props) in grouped {
        let endpoint = resolve_endpoint(&name, &props)?;
        let success = props.get("success").cloned().ok_or_else(|| {
            Error::Config(format!("must specify \"success\" literal for check {name}"))
        })?;
        checks.insert(name, CheckSpec { endpoint, success });
    }
    Ok(checks)
}

fn resolve_endpoint(name: &str, props: &BTreeMap<String, String>) -> Result<CheckEndpoint> {
    match (props.get("method"), props.get("port"), props.get("path")) {
        (Some(method), Some(port), Some(path)) => {
            let method = match method.as_str() {
                "http" => CheckMethod::Http,
                "https" => CheckMethod::Https,
                _ => {
                    return Err(Error::Config(format!(
                        "check.{name}.method needs to be one of http or https"
                    )));
                }
            };
            let port: u16 = port.parse().map_err(|e| {
                Error::Config(format!(
                    "invalid check.{name}.port: {e} (needs to be in range 0..65535)"
                ))
            })?;
            if !path.starts_with('/') {
                return Err(Error::Config(format!(
                    "check.{name}.path needs to start with \"/\""
                )));
            }
            Ok(CheckEndpoint::HostPort {
                method,
                port,
                path: path.clone(),
            })
        }
        _ => match props.get("url") {
            Some(url) => Ok(CheckEndpoint::Url(url.clone())),
            None => Err(Error::Config(format!(
                "must specify either url or method/port/path (preferred) properties for check \"{name}\""
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conf(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn host_port_check_parses() {
        let conf = conf(&[
            ("check.web.method", "http"),
            ("check.web.port", "8080"),
            ("check.web.path", "/health"),
            ("check.web.success", "UP"),
        ]);
        let checks = parse_checks(&conf).unwrap();
        let spec = checks.get("web").unwrap();
        assert_eq!(spec.success, "UP");
        let url = spec.url();
        assert!(url.starts_with("http://"));
        assert!(url.ends_with(":8080/health"));
    }

    #[test]
    fn literal_url_check_parses() {
        let conf = conf(&[
            ("check.ping.url", "https://example.invalid/ping"),
            ("check.ping.success", "pong"),
        ]);
        let checks = parse_checks(&conf).unwrap();
        assert_eq!(
            checks.get("ping").unwrap().url(),
            "https://example.invalid/ping"
        );
    }

    #[test]
    fn bad_method_is_rejected() {
        let conf = conf(&[
            ("check.web.method", "ftp"),
            ("check.web.port", "21"),
            ("check.web.path", "/"),
            ("check.web.success", "ok"),
        ]);
        let err = parse_checks(&conf).unwrap_err();
        assert!(
            err.to_string()
                .contains("check.web.method needs to be one of http or https")
        );
    }

    #[test]
    fn path_must_be_absolute() {
        let conf = conf(&[
            ("check.web.method", "http"),
            ("check.web.port", "80"),
            ("check.web.path", "health"),
            ("check.web.success", "ok"),
        ]);
        let err = parse_checks(&conf).unwrap_err();
        assert!(err.to_string().contains("needs to start with"));
    }

    #[test]
    fn missing_success_literal_is_rejected() {
        let conf = conf(&[("check.web.url", "http://localhost/health")]);
        let err = parse_checks(&conf).unwrap_err();
        assert!(
            err.to_string()
                .contains("must specify \"success\" literal for check web")
        );
    }

    #[test]
    fn missing_endpoint_is_rejected() {
        let conf = conf(&[("check.web.success", "ok")]);
        let err = parse_checks(&conf).unwrap_err();
        assert!(err.to_string().contains("url or method/port/path"));
    }
}
