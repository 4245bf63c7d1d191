//! Server version parsing and the version -> feature table.
//!
//! Feature availability is data, not inline version checks: each entry of
//! [`FEATURE_TABLE`] names the first MySQL and MariaDB release that has it.

/// Server flavour, detected from the version string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    MySql,
    MariaDb,
}

/// Parsed `major.minor.patch` server version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ServerVersion {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
}

impl ServerVersion {
    pub const fn new(major: u16, minor: u16, patch: u16) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse the leading `x.y.z` of a version string such as `8.0.36-log` or
    /// `5.5.5-10.11.6-MariaDB`. Missing components are 0.
    pub fn parse(version: &str) -> (Self, Flavor) {
        let flavor = if version.contains("MariaDB") {
            Flavor::MariaDb
        } else {
            Flavor::MySql
        };
        // MariaDB 10+ prefixes its version with a fake "5.5.5-" for old clients
        let version = match flavor {
            Flavor::MariaDb => version.strip_prefix("5.5.5-").unwrap_or(version),
            Flavor::MySql => version,
        };
        let mut parts = version.split('.').map(|part| {
            part.bytes()
                .take_while(u8::is_ascii_digit)
                .fold(0u16, |acc, b| acc.saturating_mul(10).saturating_add(u16::from(b - b'0')))
        });
        let major = parts.next().unwrap_or(0);
        let minor = parts.next().unwrap_or(0);
        let patch = parts.next().unwrap_or(0);
        (Self::new(major, minor, patch), flavor)
    }
}

/// Optional server features the client adapts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    /// COM_RESET_CONNECTION
    ResetConnection,
    /// OUT parameters returned natively through `CLIENT_PS_MULTI_RESULTS`
    NativeOutParams,
    /// caching_sha2_password as default auth plugin
    CachingSha2Password,
    /// `CLIENT_SESSION_TRACK`
    SessionTrack,
    /// Read-only cursors for COM_STMT_EXECUTE
    Cursors,
    /// `CLIENT_CAN_HANDLE_EXPIRED_PASSWORDS`
    ExpiredPasswords,
}

/// First MySQL / MariaDB version that supports each feature (`None` = never).
pub const FEATURE_TABLE: &[(Feature, Option<ServerVersion>, Option<ServerVersion>)] = &[
    (
        Feature::ResetConnection,
        Some(ServerVersion::new(5, 7, 3)),
        Some(ServerVersion::new(10, 2, 4)),
    ),
    (
        Feature::NativeOutParams,
        Some(ServerVersion::new(5, 5, 3)),
        Some(ServerVersion::new(10, 0, 0)),
    ),
    (
        Feature::CachingSha2Password,
        Some(ServerVersion::new(8, 0, 3)),
        None,
    ),
    (
        Feature::SessionTrack,
        Some(ServerVersion::new(5, 7, 0)),
        Some(ServerVersion::new(10, 2, 2)),
    ),
    (
        Feature::Cursors,
        Some(ServerVersion::new(5, 0, 2)),
        Some(ServerVersion::new(5, 0, 2)),
    ),
    (
        Feature::ExpiredPasswords,
        Some(ServerVersion::new(5, 6, 10)),
        Some(ServerVersion::new(10, 4, 3)),
    ),
];

/// Feature set of a connected server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerFeatures {
    pub version: ServerVersion,
    pub flavor: Flavor,
}

impl ServerFeatures {
    /// Resolve the feature set from the greeting's version string.
    pub fn from_version_string(version: &str) -> Self {
        let (version, flavor) = ServerVersion::parse(version);
        Self { version, flavor }
    }

    /// True if the server supports `feature`.
    pub fn supports(&self, feature: Feature) -> bool {
        FEATURE_TABLE
            .iter()
            .find(|(f, _, _)| *f == feature)
            .and_then(|(_, mysql, mariadb)| match self.flavor {
                Flavor::MySql => *mysql,
                Flavor::MariaDb => *mariadb,
            })
            .is_some_and(|min| self.version >= min)
    }

    /// True for MariaDB servers.
    pub fn is_mariadb(&self) -> bool {
        self.flavor == Flavor::MariaDb
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mysql() {
        let (v, flavor) = ServerVersion::parse("8.0.36-0ubuntu0.22.04.1");
        assert_eq!(v, ServerVersion::new(8, 0, 36));
        assert_eq!(flavor, Flavor::MySql);
    }

    #[test]
    fn test_parse_mariadb_prefix() {
        let (v, flavor) = ServerVersion::parse("5.5.5-10.11.6-MariaDB-log");
        assert_eq!(v, ServerVersion::new(10, 11, 6));
        assert_eq!(flavor, Flavor::MariaDb);
    }

    #[test]
    fn test_parse_garbage() {
        let (v, _) = ServerVersion::parse("unknown");
        assert_eq!(v, ServerVersion::new(0, 0, 0));
    }

    #[test]
    fn test_feature_table() {
        let old = ServerFeatures::from_version_string("5.6.51");
        assert!(!old.supports(Feature::ResetConnection));
        assert!(old.supports(Feature::NativeOutParams));

        let new = ServerFeatures::from_version_string("8.0.36");
        assert!(new.supports(Feature::ResetConnection));
        assert!(new.supports(Feature::CachingSha2Password));

        let maria = ServerFeatures::from_version_string("5.5.5-10.6.16-MariaDB");
        assert!(maria.supports(Feature::ResetConnection));
        assert!(!maria.supports(Feature::CachingSha2Password));
        assert!(maria.is_mariadb());
    }
}
