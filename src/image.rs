//! Image reference helpers
//!
//! Pure string manipulation over image references as emitted by discovery scripts
//! (`[host/]path[:tag]`). Nothing here touches the network.

use crate::error::{Result, SyncError};

/// Registry assumed for references without an explicit host segment
pub const DEFAULT_REGISTRY_HOST: &str = "docker.io";

/// Build the destination reference for `image` on `host`, optionally namespaced by `repository`.
///
/// An image that already starts with the repository prefix is only host-qualified, so
/// retagging never doubles the repository segment.
pub fn retag(image: &str, host: &str, repository: &str) -> String {
    if image.starts_with(repository) {
        format!("{host}/{image}")
    } else if !repository.is_empty() {
        format!("{host}/{repository}/{image}")
    } else {
        format!("{host}/{image}")
    }
}

/// Strip every `host/` segment from `image`
pub fn image_without_host(image: &str, host: &str) -> String {
    image.replace(&format!("{host}/"), "")
}

/// Split a reference into `(name, tag)`. The tag is empty when absent.
///
/// Only a colon after the final `/` separates a tag, so `localhost:5000/app` has no tag.
/// Digest references (`name@sha256:...`) report an empty tag.
pub fn split_image_tag(image: &str) -> (&str, &str) {
    if let Some((name, _digest)) = image.split_once('@') {
        return (name, "");
    }
    let last_segment = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[last_segment..].rfind(':') {
        Some(colon) => {
            let at = last_segment + colon;
            (&image[..at], &image[at + 1..])
        }
        None => (image, ""),
    }
}

/// Tags whose content may change under the same name; these are always re-synced
pub fn is_mutable_tag(tag: &str) -> bool {
    tag.is_empty() || tag == "latest"
}

/// Tag used to correlate a registry with its scheduled job
pub fn cron_job_tag(hostname: &str) -> String {
    format!("{hostname}-job")
}

/// Registry host a reference will be pulled from
pub fn registry_host(image: &str) -> &str {
    match image.split_once('/') {
        Some((first, _))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            first
        }
        _ => DEFAULT_REGISTRY_HOST,
    }
}

/// Username/password pair parsed from a `"username:password"` credential string
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Parse a credential string configured for `hostname`.
    ///
    /// An empty string means anonymous access and yields `None`.
    pub fn parse(auth: &str, hostname: &str) -> Result<Option<Self>> {
        if auth.is_empty() {
            return Ok(None);
        }
        let parts: Vec<&str> = auth.split(':').collect();
        match parts.as_slice() {
            [username, password] => Ok(Some(Self {
                username: (*username).to_string(),
                password: (*password).to_string(),
            })),
            _ => Err(SyncError::InvalidCredentials {
                hostname: hostname.to_string(),
            }),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}
