//! Release version parsing and upgrade channel resolution.

use semver::Version;

use crate::error::{KeoError, Result};

/// Prefix carried by release names handed out by the provider.
pub const RELEASE_PREFIX: &str = "openshift-v";

/// Parse a release name or version into a semantic version.
///
/// Accepts `openshift-v4.14.3`, `v4.14.3` and `4.14.3`. A two-part version such as
/// `4.14` is read as `4.14.0`.
pub fn parse_version(raw: &str) -> Result<Version> {
    let trimmed = raw.trim();
    let stripped = trimmed
        .strip_prefix(RELEASE_PREFIX)
        .or_else(|| trimmed.strip_prefix('v'))
        .unwrap_or(trimmed);

    if let Ok(version) = Version::parse(stripped) {
        return Ok(version);
    }

    let parts: Vec<&str> = stripped.split('.').collect();
    if let [major, minor] = parts.as_slice()
        && let (Ok(major), Ok(minor)) = (major.parse::<u64>(), minor.parse::<u64>())
    {
        return Ok(Version::new(major, minor, 0));
    }

    Err(KeoError::InvalidVersion(raw.to_string()))
}

/// Returns true for release-candidate prereleases (`4.15.0-rc.2`).
pub fn is_release_candidate(version: &Version) -> bool {
    version.pre.as_str().starts_with("rc")
}

/// Resolves the channel a version is published in.
#[derive(Debug, Clone)]
pub struct ChannelResolver {
    channel_group: String,
    z_stream_base: Option<Version>,
}

impl ChannelResolver {
    pub fn new(channel_group: &str) -> Self {
        Self {
            channel_group: channel_group.trim().to_string(),
            z_stream_base: None,
        }
    }

    /// Resolve every version against the installed version's minor stream.
    #[must_use]
    pub fn only_z_stream(mut self, install_version: Version) -> Self {
        self.z_stream_base = Some(install_version);
        self
    }

    /// Channel for `version`: `candidate-X.Y` for release candidates,
    /// `<channel group>-X.Y` otherwise.
    pub fn resolve(&self, version: &Version) -> Result<String> {
        let base = self.z_stream_base.as_ref().unwrap_or(version);
        if is_release_candidate(base) {
            return Ok(format!("candidate-{}.{}", base.major, base.minor));
        }
        if self.channel_group.is_empty() {
            return Err(KeoError::UnresolvableChannel(version.to_string()));
        }
        Ok(format!("{}-{}.{}", self.channel_group, base.major, base.minor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version_prefixes() {
        assert_eq!(parse_version("openshift-v4.14.3").unwrap(), Version::new(4, 14, 3));
        assert_eq!(parse_version("v4.14.3").unwrap(), Version::new(4, 14, 3));
        assert_eq!(parse_version(" 4.14.3 ").unwrap(), Version::new(4, 14, 3));
        assert_eq!(parse_version("4.15").unwrap(), Version::new(4, 15, 0));
    }

    #[test]
    fn test_parse_version_prerelease() {
        let v = parse_version("openshift-v4.15.0-rc.2").unwrap();
        assert_eq!(v.pre.as_str(), "rc.2");
        assert!(is_release_candidate(&v));
    }

    #[test]
    fn test_parse_version_invalid() {
        assert!(matches!(
            parse_version("latest"),
            Err(KeoError::InvalidVersion(_))
        ));
        assert!(parse_version("").is_err());
    }

    #[test]
    fn test_resolve_channel_group() {
        let resolver = ChannelResolver::new("fast");
        assert_eq!(resolver.resolve(&Version::new(4, 14, 3)).unwrap(), "fast-4.14");
        let stable = ChannelResolver::new("stable");
        assert_eq!(stable.resolve(&Version::new(4, 15, 1)).unwrap(), "stable-4.15");
    }

    #[test]
    fn test_resolve_release_candidate() {
        let resolver = ChannelResolver::new("stable");
        let rc = parse_version("4.16.0-rc.0").unwrap();
        assert_eq!(resolver.resolve(&rc).unwrap(), "candidate-4.16");
    }

    #[test]
    fn test_resolve_only_z_stream_uses_install_version() {
        let resolver = ChannelResolver::new("fast").only_z_stream(Version::new(4, 13, 9));
        assert_eq!(resolver.resolve(&Version::new(4, 14, 3)).unwrap(), "fast-4.13");
    }

    #[test]
    fn test_resolve_empty_group_is_unresolvable() {
        let resolver = ChannelResolver::new("  ");
        assert!(matches!(
            resolver.resolve(&Version::new(4, 14, 3)),
            Err(KeoError::UnresolvableChannel(_))
        ));
    }
}
