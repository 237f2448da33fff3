//! Contact identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Country prefix added to national numbers that arrive without one.
const DEFAULT_COUNTRY_CODE: &str = "55";

/// A normalized patient contact: digits only, country code included.
///
/// Channel suffixes (`@c.us`, `@s.whatsapp.net`) and formatting characters are
/// stripped. National numbers (10 or 11 digits) get the default country code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContactId(String);

impl ContactId {
    /// Normalize a raw phone number or channel address.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let address = raw.split('@').next().unwrap_or(raw);
        let digits: String = address.chars().filter(|c| c.is_ascii_digit()).collect();

        match digits.len() {
            10 | 11 => Ok(Self(format!("{DEFAULT_COUNTRY_CODE}{digits}"))),
            12..=15 => Ok(Self(digits)),
            _ => Err(CoreError::InvalidContact(raw.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContactId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ContactId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ContactId> for String {
    fn from(value: ContactId) -> Self {
        value.0
    }
}
