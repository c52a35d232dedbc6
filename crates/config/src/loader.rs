use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::{Error, HelmConfig, Result};

pub const CONFIG_FILENAME: &str = "helm.toml";

/// Platform config directory, e.g. `~/.config/helm` on Linux.
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "helm").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Parse one config file. Missing sections and fields take their defaults.
pub fn load(path: &Path) -> Result<HelmConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config: HelmConfig = toml::from_str(&raw).map_err(|source| Error::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    config.validate()?;
    debug!(path = %path.display(), "loaded config");
    Ok(config)
}

/// First `helm.toml` found in `cwd`, then in the platform config dir.
pub fn find_config_file(cwd: &Path) -> Option<PathBuf> {
    std::iter::once(cwd.to_path_buf())
        .chain(config_dir())
        .map(|dir| dir.join(CONFIG_FILENAME))
        .find(|candidate| candidate.is_file())
}

/// Load `explicit` if given, otherwise the first discovered `helm.toml`,
/// otherwise defaults. Environment overrides are applied last.
pub fn discover_and_load(explicit: Option<&Path>) -> Result<HelmConfig> {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => std::env::current_dir()
            .ok()
            .and_then(|cwd| find_config_file(&cwd)),
    };
    let mut config = match path {
        Some(path) => {
            info!(path = %path.display(), "using config file");
            load(&path)?
        },
        None => {
            debug!("no config file found, using defaults");
            HelmConfig::default()
        },
    };
    config.apply_env()?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use {super::*, secrecy::ExposeSecret, std::io::Write};

    fn write(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join(CONFIG_FILENAME);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            r#"
[server]
port = 4711

[auth]
token = "abc"
allowed_origins = ["https://panel.example"]
"#,
        );
        let config = load(&path).unwrap();
        assert_eq!(config.server.port, 4711);
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.server.request_timeout_ms, 5_000);
        assert_eq!(config.token().unwrap().expose_secret(), "abc");
        assert_eq!(config.auth.allowed_origins, vec!["https://panel.example"]);
    }

    #[test]
    fn tls_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "[tls]\ncert_path = \"/etc/helm/cert.pem\"\nkey_path = \"/etc/helm/key.pem\"\n",
        );
        let tls = load(&path).unwrap().tls.unwrap();
        assert_eq!(tls.cert_path, PathBuf::from("/etc/helm/cert.pem"));
        assert_eq!(tls.key_path, PathBuf::from("/etc/helm/key.pem"));
    }

    #[test]
    fn parse_errors_name_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "[server\nport = 1");
        let err = load(&path).unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
        assert!(err.to_string().contains(CONFIG_FILENAME));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "[server]\ntick_interval_ms = 0\n");
        assert!(matches!(load(&path), Err(Error::Invalid(_))));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn working_directory_is_searched_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "");
        assert_eq!(find_config_file(dir.path()), Some(path));
    }
}
