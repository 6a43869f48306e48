use crate::error::*;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fs, io, path::*};
use url::Url;

/// Registry credentials stored in the filesystem
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoredAuth {
    #[serde(default)]
    auths: HashMap<String, Auth>,
}

impl StoredAuth {
    /// Load credentials of docker, podman and imgkit, later ones win
    pub fn load_all() -> Result<Self> {
        let mut auth = StoredAuth::default();
        for path in [docker_auth_path(), podman_auth_path()].into_iter().flatten() {
            match Self::from_path(&path) {
                Ok(new) => auth.append(new),
                Err(e) => log::warn!("Ignore broken credentials: {}", e),
            }
        }
        if let Some(path) = auth_path() {
            auth.append(Self::from_path(&path)?);
        }
        Ok(auth)
    }

    /// Register base64 encoded `username:password` for the domain
    pub fn insert(&mut self, domain: &str, octet: String) {
        self.auths
            .insert(domain.to_string(), Auth { auth: Some(octet) });
    }

    pub fn add(&mut self, domain: &str, username: &str, password: &str) {
        self.insert(domain, base64::encode(format!("{}:{}", username, password)));
    }

    pub fn append(&mut self, other: Self) {
        self.auths.extend(other.auths);
    }

    /// Credential for one of the domains, tried in order
    ///
    /// Docker stores Docker Hub credentials under `https://index.docker.io/v1/`,
    /// so keys are compared by host as well.
    fn find(&self, domains: &[&str]) -> Option<&str> {
        domains.iter().find_map(|domain| {
            self.auths
                .iter()
                .find(|(key, _)| key.as_str() == *domain || host_of(key) == Some(*domain))
                .and_then(|(_, auth)| auth.auth.as_deref())
        })
    }

    /// Get a bearer token answering the `WWW-Authenticate` challenge of `registry`
    pub fn challenge(&self, registry: &str, challenge: &AuthChallenge) -> Result<String> {
        let token_url = Url::parse(&challenge.url)?;
        let token_domain = token_url.host_str().unwrap_or_default();

        let mut req = ureq::get(token_url.as_str()).set("Accept", "application/json");
        if let Some(auth) = self.find(&[registry, token_domain]) {
            req = req.set("Authorization", &format!("Basic {}", auth));
        }
        req = req.query("service", &challenge.service);
        if let Some(scope) = &challenge.scope {
            req = req.query("scope", scope);
        }
        match req.call() {
            Ok(res) => {
                let token = res.into_json::<Token>()?;
                token
                    .token
                    .or(token.access_token)
                    .ok_or(Error::AuthorizationFailed(token_url))
            }
            Err(ureq::Error::Status(..)) => Err(Error::AuthorizationFailed(token_url)),
            Err(ureq::Error::Transport(e)) => Err(Error::NetworkError(e.into())),
        }
    }

    fn from_path(path: &Path) -> Result<Self> {
        if path.is_file() {
            let f = fs::File::open(path).map_err(|e| Error::path(path, e))?;
            Ok(serde_json::from_reader(io::BufReader::new(f))?)
        } else {
            Ok(Self::default())
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Auth {
    /// Absent when a credential helper is used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    auth: Option<String>,
}

fn host_of(key: &str) -> Option<&str> {
    let rest = key
        .strip_prefix("https://")
        .or_else(|| key.strip_prefix("http://"))?;
    let host = rest.split('/').next()?;
    Some(if host == "index.docker.io" {
        "docker.io"
    } else {
        host
    })
}

fn auth_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "imgkit")
        .and_then(|dirs| Some(dirs.runtime_dir()?.join("auth.json")))
        .or_else(|| {
            // Fallback to `~/.imgkit/config.json` when XDG_RUNTIME_DIR is not set
            let dirs = directories::BaseDirs::new()?;
            Some(dirs.home_dir().join(".imgkit/config.json"))
        })
}

fn docker_auth_path() -> Option<PathBuf> {
    let dirs = directories::BaseDirs::new()?;
    Some(dirs.home_dir().join(".docker/config.json"))
}

fn podman_auth_path() -> Option<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "containers")?;
    Some(dirs.runtime_dir()?.join("auth.json"))
}

/// WWW-Authentication challenge
///
/// ```
/// use imgkit::storage::remote::AuthChallenge;
///
/// let auth = AuthChallenge::from_header(
///   r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/ubuntu:pull""#,
/// ).unwrap();
///
/// assert_eq!(auth, AuthChallenge {
///   url: "https://auth.docker.io/token".to_string(),
///   service: "registry.docker.io".to_string(),
///   scope: Some("repository:library/ubuntu:pull".to_string()),
/// });
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    pub url: String,
    pub service: String,
    pub scope: Option<String>,
}

impl AuthChallenge {
    pub fn from_header(header: &str) -> Result<Self> {
        let err = || Error::UnSupportedAuthHeader(header.to_string());
        let (ty, realm) = header.split_once(' ').ok_or_else(err)?;
        if !ty.eq_ignore_ascii_case("Bearer") {
            return Err(err());
        }

        let mut url = None;
        let mut service = None;
        let mut scope = None;
        for param in split_params(realm) {
            let (key, value) = param.split_once('=').ok_or_else(err)?;
            let value = value.trim_matches('"').to_string();
            match key.trim() {
                "realm" => url = Some(value),
                "service" => service = Some(value),
                "scope" => scope = Some(value),
                _ => continue,
            }
        }
        Ok(Self {
            url: url.ok_or_else(err)?,
            service: service.ok_or_else(err)?,
            scope,
        })
    }
}

/// Split on commas outside quotes, since a scope may list several actions `pull,push`
fn split_params(input: &str) -> Vec<&str> {
    let mut params = Vec::new();
    let mut quoted = false;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => {
                params.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    params.push(&input[start..]);
    params.into_iter().filter(|p| !p.trim().is_empty()).collect()
}

#[derive(Deserialize)]
struct Token {
    token: Option<String>,
    access_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_header() -> Result<()> {
        let challenge = AuthChallenge::from_header(
            r#"Bearer realm="https://ghcr.io/token",service="ghcr.io",scope="repository:owner/app:pull,push""#,
        )?;
        assert_eq!(challenge.url, "https://ghcr.io/token");
        assert_eq!(challenge.scope.as_deref(), Some("repository:owner/app:pull,push"));

        let challenge =
            AuthChallenge::from_header(r#"Bearer realm="https://ghcr.io/token",service="ghcr.io""#)?;
        assert_eq!(challenge.scope, None);

        assert!(matches!(
            AuthChallenge::from_header(r#"Basic realm="Registry""#),
            Err(Error::UnSupportedAuthHeader(_))
        ));
        Ok(())
    }

    #[test]
    fn docker_config() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{
              "auths": {
                "https://index.docker.io/v1/": { "auth": "aHViOnNlY3JldA==" },
                "ghcr.io": { "auth": "Z2g6dG9rZW4=" },
                "quay.io": {}
              },
              "credsStore": "desktop"
            }"#,
        )?;
        let mut auth = StoredAuth::from_path(&path)?;
        assert_eq!(auth.find(&["docker.io"]), Some("aHViOnNlY3JldA=="));
        assert_eq!(auth.find(&["ghcr.io"]), Some("Z2g6dG9rZW4="));
        assert_eq!(auth.find(&["quay.io"]), None);
        assert_eq!(auth.find(&["registry.example.com", "ghcr.io"]), Some("Z2g6dG9rZW4="));

        auth.add("localhost:5000", "user", "pass");
        assert_eq!(auth.find(&["localhost:5000"]), Some("dXNlcjpwYXNz"));

        assert!(StoredAuth::from_path(&dir.path().join("missing.json"))?.auths.is_empty());
        Ok(())
    }
}
