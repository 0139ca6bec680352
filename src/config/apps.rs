//! Command-line tenant registration strings.
//!
//! The `--applications` flag packs tenants into one comma-separated string,
//! each entry shaped `[[host:]port:]vpath:realpath`. Three fields mean
//! `host:vpath:realpath`, four mean `host:port:vpath:realpath`.

use std::path::PathBuf;

use crate::config::schema::TenantConfig;
use crate::error::ConfigError;

/// Parse an applications string into tenant definitions.
///
/// Malformed entries fail fast naming the offending field; an empty string
/// yields no tenants.
pub fn parse_applications(applications: &str) -> Result<Vec<TenantConfig>, ConfigError> {
    if applications.is_empty() {
        return Ok(Vec::new());
    }

    let mut tenants = Vec::new();
    for entry in applications.split(',') {
        let parts: Vec<&str> = entry.split(':').collect();
        if parts.len() < 2 || parts.len() > 4 {
            return Err(ConfigError::invalid(
                "applications",
                format!("expected [[host:]port:]vpath:realpath, got {entry:?}"),
            ));
        }

        let mut pos = 0;
        let host = if parts.len() >= 3 {
            let h = parts[pos];
            pos += 1;
            Some(h.to_string())
        } else {
            None
        };

        let port = if parts.len() >= 4 {
            let p = parts[pos];
            pos += 1;
            Some(p.parse::<u16>().map_err(|_| {
                ConfigError::invalid("applications.port", format!("not a port number: {p:?}"))
            })?)
        } else {
            None
        };

        let mut vpath = parts[pos].to_string();
        pos += 1;
        if vpath.is_empty() || !vpath.starts_with('/') {
            return Err(ConfigError::invalid(
                "applications.vpath",
                format!("must begin with '/': {vpath:?}"),
            ));
        }
        if !vpath.ends_with('/') {
            vpath.push('/');
        }

        let realpath = parts[pos];
        if realpath.is_empty() {
            return Err(ConfigError::invalid("applications.realpath", "must not be empty"));
        }
        let physical_root = std::path::absolute(PathBuf::from(realpath)).map_err(|e| {
            ConfigError::invalid("applications.realpath", format!("{realpath:?}: {e}"))
        })?;

        tenants.push(TenantConfig {
            host,
            port,
            path_prefix: vpath,
            physical_root: physical_root.to_string_lossy().into_owned(),
            enabled: true,
        });
    }

    Ok(tenants)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_fields_is_vpath_and_realpath() {
        let tenants = parse_applications("/:/srv/app").unwrap();
        assert_eq!(tenants.len(), 1);
        assert_eq!(tenants[0].host, None);
        assert_eq!(tenants[0].port, None);
        assert_eq!(tenants[0].path_prefix, "/");
    }

    #[test]
    fn three_fields_adds_host() {
        let tenants = parse_applications("example.com:/blog:/srv/blog").unwrap();
        assert_eq!(tenants[0].host.as_deref(), Some("example.com"));
        assert_eq!(tenants[0].path_prefix, "/blog/");
    }

    #[test]
    fn four_fields_adds_port() {
        let tenants = parse_applications("example.com:8080:/blog:/srv/blog").unwrap();
        assert_eq!(tenants[0].port, Some(8080));
    }

    #[test]
    fn multiple_entries_split_on_comma() {
        let tenants = parse_applications("/:/srv/a,/b:/srv/b").unwrap();
        assert_eq!(tenants.len(), 2);
        assert_eq!(tenants[1].path_prefix, "/b/");
    }

    #[test]
    fn bad_port_names_the_field() {
        let err = parse_applications("example.com:http:/blog:/srv/blog").unwrap_err();
        assert!(err.to_string().contains("applications.port"));
    }

    #[test]
    fn single_field_rejected() {
        assert!(parse_applications("/srv/app").is_err());
    }

    #[test]
    fn empty_string_is_no_tenants() {
        assert!(parse_applications("").unwrap().is_empty());
    }
}
