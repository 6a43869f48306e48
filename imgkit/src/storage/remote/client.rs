use super::{AuthChallenge, RegistryClient, StoredAuth};
use crate::{
    error::*,
    manifest::{matches_digest, Descriptor},
    reference::ImageReference,
    Context, Digest,
};
use parking_lot::Mutex;
use std::io::Read;
use url::Url;

/// A client for `/v2/<name>/` API endpoint
pub struct Client {
    agent: ureq::Agent,
    /// URL to registry server
    url: Url,
    /// Registry domain as written in the reference, e.g. `docker.io`
    domain: String,
    /// Name of repository
    name: String,
    /// Value of the `Accept` header for manifests
    accept: String,
    /// Loaded authentication info from filesystem
    auth: StoredAuth,
    /// Cached token
    token: Mutex<Option<String>>,
}

impl Client {
    pub fn new(reference: &ImageReference, accept: &[String], auth: StoredAuth) -> Result<Self> {
        Ok(Client {
            agent: ureq::Agent::new(),
            url: reference.registry_url()?,
            domain: reference.domain.clone(),
            name: reference.name.to_string(),
            accept: accept.join(", "),
            auth,
            token: Mutex::new(None),
        })
    }

    fn call(&self, req: ureq::Request) -> Result<ureq::Response> {
        let token = self.token.lock().clone();
        let token = match token {
            Some(token) => token,
            None => {
                // Try without token first, and get the challenge on 401
                let challenge = match req.clone().call() {
                    Ok(res) => return Ok(res),
                    Err(ureq::Error::Status(401, res)) => {
                        let header = res
                            .header("www-authenticate")
                            .ok_or_else(|| Error::UnSupportedAuthHeader(String::new()))?;
                        AuthChallenge::from_header(header)?
                    }
                    Err(e) => return Err(e.into()),
                };
                let token = self.auth.challenge(&self.domain, &challenge)?;
                *self.token.lock() = Some(token.clone());
                token
            }
        };
        Ok(req
            .set("Authorization", &format!("Bearer {}", token))
            .call()?)
    }

    fn manifest_url(&self, reference: &ImageReference) -> Result<Url> {
        let tag_or_digest = reference
            .tag_or_digest()
            .ok_or_else(|| Error::InvalidReference(format!("{}: no tag or digest", reference)))?;
        Ok(self
            .url
            .join(&format!("/v2/{}/manifests/{}", self.name, tag_or_digest))?)
    }

    fn request(&self, method: &str, url: &Url) -> ureq::Request {
        log::info!("{} {}", method, url);
        self.agent.request(method, url.as_str())
    }
}

/// Headers describing the content of a manifest response
struct ContentHeaders {
    url: String,
    media_type: String,
    digest: Option<Digest>,
    size: Option<i64>,
}

impl ContentHeaders {
    fn new(res: &ureq::Response) -> Result<Self> {
        let media_type = res
            .header("Content-Type")
            .map(|ty| ty.split(';').next().unwrap_or_default().trim().to_string())
            .unwrap_or_default();
        let digest = res
            .header("Docker-Content-Digest")
            .map(Digest::new)
            .transpose()?;
        let size = res
            .header("Content-Length")
            .and_then(|len| len.parse::<i64>().ok());
        Ok(ContentHeaders {
            url: res.get_url().to_string(),
            media_type,
            digest,
            size,
        })
    }

    /// Descriptor of the body, checked against the digest header when both exist
    fn descriptor(self, body: Option<&[u8]>) -> Result<Descriptor> {
        match (body, self.digest, self.size) {
            (Some(body), digest, _) => {
                let computed = Digest::from_buf_sha256(body);
                if let Some(digest) = digest {
                    if !matches_digest(body, &digest) {
                        return Err(Error::invalid_field(
                            "Docker-Content-Digest",
                            format!("{} does not match content {}", digest, computed),
                        ));
                    }
                }
                Ok(Descriptor::new(&self.media_type, computed, body.len() as i64))
            }
            (None, Some(digest), Some(size)) => {
                Ok(Descriptor::new(&self.media_type, digest, size))
            }
            (None, _, _) => Err(Error::NotFound(format!(
                "digest of {} in response headers",
                self.url
            ))),
        }
    }
}

impl RegistryClient for Client {
    /// ```text
    /// GET /v2/<name>/manifests/<reference>
    /// ```
    fn fetch_tag_or_digest(
        &self,
        ctx: &Context,
        reference: &ImageReference,
    ) -> Result<(Vec<u8>, Descriptor)> {
        ctx.check()?;
        let url = self.manifest_url(reference)?;
        let res = self.call(self.request("GET", &url).set("Accept", &self.accept))?;
        let headers = ContentHeaders::new(&res)?;
        let mut bytes = Vec::new();
        res.into_reader()
            .read_to_end(&mut bytes)
            .map_err(Error::UnknownIo)?;
        let descriptor = headers.descriptor(Some(&bytes))?;
        if let Some(expected) = &reference.digest {
            if !matches_digest(&bytes, expected) {
                return Err(Error::invalid_field(
                    "digest",
                    format!("manifest of {} does not match", reference),
                ));
            }
        }
        Ok((bytes, descriptor))
    }

    /// ```text
    /// HEAD /v2/<name>/manifests/<reference>
    /// ```
    fn stat_tag_or_digest(&self, ctx: &Context, reference: &ImageReference) -> Result<Descriptor> {
        ctx.check()?;
        let url = self.manifest_url(reference)?;
        let res = self.call(self.request("HEAD", &url).set("Accept", &self.accept))?;
        ContentHeaders::new(&res)?.descriptor(None)
    }

    /// ```text
    /// GET /v2/<name>/blobs/<digest>
    /// ```
    fn fetch_blob(&self, ctx: &Context, _: &ImageReference, digest: &Digest) -> Result<Vec<u8>> {
        ctx.check()?;
        let url = self
            .url
            .join(&format!("/v2/{}/blobs/{}", self.name, digest))?;
        let res = self.call(self.request("GET", &url))?;
        let mut bytes = Vec::new();
        res.into_reader()
            .read_to_end(&mut bytes)
            .map_err(Error::UnknownIo)?;
        if !digest.matches(&bytes) {
            return Err(Error::invalid_field(
                "digest",
                format!("blob {} does not match its content", digest),
            ));
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{jws::testing::sign, media_type};

    const PAYLOAD: &str = "{\n  \"schemaVersion\": 1,\n  \"name\": \"library/app\",\n  \"tag\": \"v1\"\n}";

    fn headers(digest: Option<Digest>) -> ContentHeaders {
        ContentHeaders {
            url: "https://registry.example.com/v2/library/app/manifests/v1".to_string(),
            media_type: media_type::DOCKER_V2_SCHEMA1_SIGNED.to_string(),
            digest,
            size: None,
        }
    }

    #[test]
    fn signed_schema1_with_payload_digest() -> Result<()> {
        let signed = sign(PAYLOAD);
        let header = Digest::from_buf_sha256(PAYLOAD.as_bytes());
        let descriptor = headers(Some(header)).descriptor(Some(signed.as_bytes()))?;
        // Descriptor stays over the bytes as received
        assert_eq!(descriptor.digest, Digest::from_buf_sha256(signed.as_bytes()));
        assert_eq!(descriptor.size, signed.len() as i64);
        assert_eq!(descriptor.media_type, media_type::DOCKER_V2_SCHEMA1_SIGNED);
        Ok(())
    }

    #[test]
    fn mismatched_digest_header() {
        let signed = sign(PAYLOAD);
        let other = Digest::from_buf_sha256(b"{}");
        assert!(matches!(
            headers(Some(other)).descriptor(Some(signed.as_bytes())),
            Err(Error::InvalidField { .. })
        ));
    }

    #[test]
    fn head_needs_digest_and_size() -> Result<()> {
        let digest = Digest::from_buf_sha256(PAYLOAD.as_bytes());
        let mut with_size = headers(Some(digest.clone()));
        with_size.size = Some(PAYLOAD.len() as i64);
        assert_eq!(with_size.descriptor(None)?.digest, digest);
        assert!(matches!(
            headers(Some(digest)).descriptor(None),
            Err(Error::NotFound(_))
        ));
        Ok(())
    }
}
