//! Global account names.
//!
//! Names are canonicalised the way the wiki software stores them: underscores
//! become spaces, whitespace runs collapse, surrounding whitespace is dropped and
//! the first character is upper-cased. Two spellings that canonicalise to the
//! same string are the same account.
use super::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Maximum stored length of an account name, in bytes.
pub const MAX_NAME_BYTES: usize = 255;

// Characters that cannot appear in any page title, and therefore in no user page.
const TITLE_ILLEGAL: &[char] = &['#', '<', '>', '[', ']', '|', '{', '}', '/'];
// Legal in legacy names but refused for newly created accounts.
const NOT_CREATABLE: &[char] = &['@', ':', '='];

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountName(String);

impl AccountName {
    /// Canonicalise and validate an existing account name.
    ///
    /// ```
    /// use concord_common::AccountName;
    ///
    /// let name = AccountName::parse("  alice_the_great ").unwrap();
    /// assert_eq!(name.as_str(), "Alice the great");
    /// assert!(AccountName::parse("a|b").is_err());
    /// ```
    pub fn parse(input: &str) -> Result<Self> {
        let canonical = canonicalize(input);
        if canonical.is_empty() {
            return Err(invalid(input, "empty"));
        }
        if canonical.len() > MAX_NAME_BYTES {
            return Err(invalid(input, "too long"));
        }
        if canonical.chars().any(|c| c.is_control()) {
            return Err(invalid(input, "control character"));
        }
        if canonical.contains(TITLE_ILLEGAL) {
            return Err(invalid(input, "character not allowed in titles"));
        }
        if canonical.parse::<IpAddr>().is_ok() {
            return Err(invalid(input, "looks like an IP address"));
        }
        Ok(Self(canonical))
    }

    /// Validate a name that is about to be created (stricter than [`AccountName::parse`]).
    pub fn parse_creatable(input: &str) -> Result<Self> {
        let name = Self::parse(input)?;
        if !name.is_creatable() {
            return Err(invalid(input, "reserved character"));
        }
        Ok(name)
    }

    pub fn is_creatable(&self) -> bool {
        !self.0.contains(NOT_CREATABLE)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn canonicalize(input: &str) -> String {
    let spaced = input.replace('_', " ");
    let collapsed = spaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn invalid(input: &str, reason: &'static str) -> Error {
    Error::InvalidName {
        name: input.to_string(),
        reason,
    }
}

impl fmt::Display for AccountName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AccountName {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        Self::parse(input)
    }
}

impl TryFrom<String> for AccountName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<AccountName> for String {
    fn from(value: AccountName) -> String {
        value.0
    }
}
