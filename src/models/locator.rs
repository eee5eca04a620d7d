//! Object addresses of the form `scheme://container/key`.

use crate::errors::{TransferError, TransferResult};
use serde::Serialize;
use std::{fmt, str::FromStr};

/// A parsed (container, key) pair.
///
/// The container is restricted to ASCII alphanumerics, `-` and `_`. The key
/// is everything after the slash that follows the container; it may be empty
/// (the container root) and may contain further slashes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct StorageLocator {
    scheme: String,
    container: String,
    key: String,
}

impl StorageLocator {
    pub fn parse(input: &str) -> TransferResult<Self> {
        let bad = || TransferError::InvalidAddress(input.to_string());

        let (scheme, rest) = input.split_once("://").ok_or_else(bad)?;
        if scheme.is_empty() || !scheme.chars().all(is_scheme_char) {
            return Err(bad());
        }

        let (container, key) = rest.split_once('/').unwrap_or((rest, ""));
        if container.is_empty() || !container.chars().all(is_container_char) {
            return Err(bad());
        }

        Ok(Self {
            scheme: scheme.to_string(),
            container: container.to_string(),
            key: key.to_string(),
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// True when the locator names the container itself rather than an object.
    pub fn is_root(&self) -> bool {
        self.key.is_empty()
    }
}

fn is_container_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

fn is_scheme_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')
}

impl FromStr for StorageLocator {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for StorageLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.container, self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_bucket_and_nested_key() {
        let loc = StorageLocator::parse("s3://test-bucket/path/data.txt").unwrap();
        assert_eq!(loc.container(), "test-bucket");
        assert_eq!(loc.key(), "path/data.txt");
        assert!(!loc.is_root());
        assert_eq!(loc.to_string(), "s3://test-bucket/path/data.txt");
    }

    #[test]
    fn empty_key_is_container_root() {
        let loc: StorageLocator = "s3://my_bucket/".parse().unwrap();
        assert_eq!(loc.container(), "my_bucket");
        assert!(loc.is_root());
    }

    #[test]
    fn trailing_slash_after_container_is_optional() {
        let loc = StorageLocator::parse("s3://bucket").unwrap();
        assert_eq!(loc.container(), "bucket");
        assert_eq!(loc.key(), "");
        assert!(loc.is_root());
        assert_eq!(loc, StorageLocator::parse("s3://bucket/").unwrap());
        assert!(StorageLocator::parse("s3://bad.bucket").is_err());
    }

    #[test]
    fn rejects_malformed_addresses() {
        for input in [
            "foobar",
            "s3://",
            "s3:///key",
            "s3://bad.bucket/key",
            "://bucket/key",
            "/bucket/key",
        ] {
            match StorageLocator::parse(input) {
                Err(TransferError::InvalidAddress(named)) => assert_eq!(named, input),
                other => panic!("{input}: expected InvalidAddress, got {other:?}"),
            }
        }
    }

    #[test]
    fn error_message_names_input() {
        let err = StorageLocator::parse("foobar").unwrap_err();
        assert!(err.to_string().contains("foobar"));
    }

    proptest! {
        #[test]
        fn valid_locators_split_into_container_and_key(
            bucket in "[A-Za-z0-9_-]{1,20}",
            key in "[a-z0-9/._-]{0,40}",
        ) {
            let loc = StorageLocator::parse(&format!("s3://{bucket}/{key}")).unwrap();
            prop_assert_eq!(loc.container(), bucket.as_str());
            prop_assert_eq!(loc.key(), key.as_str());
        }

        #[test]
        fn bare_container_is_root(bucket in "[A-Za-z0-9_-]{1,20}") {
            let loc = StorageLocator::parse(&format!("s3://{bucket}")).unwrap();
            prop_assert_eq!(loc.container(), bucket.as_str());
            prop_assert!(loc.is_root());
        }

        #[test]
        fn strings_without_scheme_separator_are_rejected(s in "[^:]*") {
            prop_assert!(StorageLocator::parse(&s).is_err());
        }
    }
}
