use std::fmt::{Debug, Display};

use super::statement::Value;

/// Width of an establishment identifier: a SIREN followed by a five-digit NIC.
pub const SIRET_LEN: usize = 14;
/// Width of a company identifier.
pub const SIREN_LEN: usize = 9;

/// Represents a company identifier (SIREN)
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Siren(String);

impl Siren {
    /// Accepts any non-blank identifier; width checks are left to the
    /// importers whose sources guarantee one.
    pub fn new(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() {
            None
        } else {
            Some(Siren(value.to_string()))
        }
    }

    /// Accepts exactly nine ASCII digits.
    pub fn parse_strict(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.len() == SIREN_LEN && value.bytes().all(|b| b.is_ascii_digit()) {
            Some(Siren(value.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Represents an establishment identifier (SIRET)
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Siret(String);

impl Siret {
    /// Accepts exactly fourteen ASCII digits.
    pub fn parse_strict(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.len() == SIRET_LEN && value.bytes().all(|b| b.is_ascii_digit()) {
            Some(Siret(value.to_string()))
        } else {
            None
        }
    }

    /// Extracts the identifier from a composite document id whose last
    /// fourteen characters are the SIRET (anything before is a prefix).
    pub fn from_composite_id(id: &str) -> Option<Self> {
        if id.len() < SIRET_LEN {
            return None;
        }
        let tail = id.get(id.len() - SIRET_LEN..)?;
        if tail.bytes().all(|b| b.is_ascii_digit()) {
            Some(Siret(tail.to_string()))
        } else {
            None
        }
    }

    pub fn siren(&self) -> Siren {
        Siren(self.0[..SIREN_LEN].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Siren {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Debug for Siren {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Siren({})", self.0)
    }
}

impl Display for Siret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Debug for Siret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Siret({})", self.0)
    }
}

impl From<&Siren> for Value {
    fn from(siren: &Siren) -> Self {
        Value::Text(Some(siren.0.clone()))
    }
}

impl From<&Siret> for Value {
    fn from(siret: &Siret) -> Self {
        Value::Text(Some(siret.0.clone()))
    }
}
