//! Execution target: the local machine or a remote host reached over ssh.
//!
//! The target's identity namespaces the on-target state record, so a test
//! run against one pod never marks another pod's provisioning as complete.

use anyhow::{bail, Context, Result};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Local,
    Remote {
        user: String,
        host: String,
        port: u16,
        key: Option<String>,
    },
}

impl Target {
    /// Parse a target spec: `local`, or `[user@]host[:port]`.
    ///
    /// The default remote user is `root` (GPU pods rarely have anything
    /// else) and the default port is 22. `key` is an optional ssh identity
    /// file passed through from the CLI.
    pub fn parse(spec: &str, key: Option<&str>) -> Result<Self> {
        let spec = spec.trim();
        if spec.is_empty() {
            bail!("empty target spec");
        }
        if spec == "local" {
            return Ok(Target::Local);
        }

        let (user, rest) = match spec.split_once('@') {
            Some((user, rest)) => (user.to_string(), rest),
            None => ("root".to_string(), spec),
        };

        let (host, port) = match rest.split_once(':') {
            Some((host, port)) => {
                let port: u16 = port
                    .parse()
                    .with_context(|| format!("invalid port in target spec '{spec}'"))?;
                (host, port)
            }
            None => (rest, 22),
        };

        if host.is_empty() {
            bail!("no host in target spec '{spec}'");
        }

        Ok(Target::Remote {
            user,
            host: host.to_string(),
            port,
            key: key.map(|k| k.to_string()),
        })
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Target::Remote { .. })
    }

    /// Filesystem-safe identity used to name the per-target state record.
    pub fn id(&self) -> String {
        match self {
            Target::Local => "local".to_string(),
            Target::Remote { host, port, .. } => {
                let host: String = host
                    .chars()
                    .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                    .collect();
                format!("{host}_{port}")
            }
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Local => write!(f, "local"),
            Target::Remote {
                user, host, port, ..
            } => write!(f, "{user}@{host}:{port}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_local() {
        assert_eq!(Target::parse("local", None).unwrap(), Target::Local);
    }

    #[test]
    fn test_parse_bare_host() {
        let t = Target::parse("pod.example.com", None).unwrap();
        assert_eq!(
            t,
            Target::Remote {
                user: "root".to_string(),
                host: "pod.example.com".to_string(),
                port: 22,
                key: None,
            }
        );
    }

    #[test]
    fn test_parse_full_spec() {
        let t = Target::parse("ubuntu@10.0.0.5:2222", Some("/tmp/id_ed25519")).unwrap();
        assert_eq!(
            t,
            Target::Remote {
                user: "ubuntu".to_string(),
                host: "10.0.0.5".to_string(),
                port: 2222,
                key: Some("/tmp/id_ed25519".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(Target::parse("", None).is_err());
        assert!(Target::parse("host:notaport", None).is_err());
        assert!(Target::parse("@:22", None).is_err());
    }

    #[test]
    fn test_id_namespacing() {
        assert_eq!(Target::parse("local", None).unwrap().id(), "local");
        let a = Target::parse("pod.example.com:40022", None).unwrap().id();
        let b = Target::parse("pod.example.com:40023", None).unwrap().id();
        assert_eq!(a, "pod_example_com_40022");
        assert_ne!(a, b);
    }

    #[test]
    fn test_display() {
        let t = Target::parse("ubuntu@pod:2222", None).unwrap();
        assert_eq!(t.to_string(), "ubuntu@pod:2222");
    }
}
