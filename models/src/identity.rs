//! Composite external identifiers.
//!
//! A composite resource is persisted by the state store as a single opaque string which references several
//! backend identifiers, e.g. `cls-abc#np-123` for a node pool inside a cluster. Every encode/decode in the
//! workspace goes through this module so that arity is validated in one place.
use serde::{Deserialize, Serialize};
use snafu::{ensure, Snafu};

use std::fmt;
use std::str::FromStr;

/// The separator placed between component ids. Backend ids never contain it.
pub const ID_SEPARATOR: char = '#';

pub type Result<T> = std::result::Result<T, FormatError>;

#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
#[snafu(visibility(pub))]
pub enum FormatError {
    #[snafu(display(
        "Identifier '{}' has {} part(s), expected exactly {} separated by '{}'",
        raw,
        actual,
        expected,
        ID_SEPARATOR
    ))]
    WrongArity {
        raw: String,
        expected: usize,
        actual: usize,
    },

    #[snafu(display("Identifier '{}' contains an empty part at position {}", raw, position))]
    EmptyPart { raw: String, position: usize },

    #[snafu(display(
        "Id component '{}' cannot be encoded because it contains the separator '{}'",
        part,
        ID_SEPARATOR
    ))]
    SeparatorInPart { part: String },
}

/// Joins component ids into one external identifier.
pub fn encode<S: AsRef<str>>(parts: &[S]) -> Result<String> {
    let mut encoded = String::new();
    for (position, part) in parts.iter().enumerate() {
        let part = part.as_ref();
        ensure!(
            !part.is_empty(),
            EmptyPartSnafu {
                raw: parts
                    .iter()
                    .map(|p| p.as_ref())
                    .collect::<Vec<_>>()
                    .join(&ID_SEPARATOR.to_string()),
                position,
            }
        );
        ensure!(
            !part.contains(ID_SEPARATOR),
            SeparatorInPartSnafu { part }
        );
        if position > 0 {
            encoded.push(ID_SEPARATOR);
        }
        encoded.push_str(part);
    }
    Ok(encoded)
}

/// Splits an external identifier into exactly `arity` non-empty component ids.
pub fn decode(raw: &str, arity: usize) -> Result<Vec<String>> {
    let parts: Vec<&str> = raw.split(ID_SEPARATOR).collect();
    ensure!(
        parts.len() == arity,
        WrongAritySnafu {
            raw,
            expected: arity,
            actual: parts.len(),
        }
    );
    if let Some(position) = parts.iter().position(|part| part.is_empty()) {
        return EmptyPartSnafu { raw, position }.fail();
    }
    Ok(parts.into_iter().map(String::from).collect())
}

/// Identifies a node pool: `clusterId#nodePoolId`.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct NodePoolId {
    pub cluster_id: String,
    pub node_pool_id: String,
}

impl NodePoolId {
    pub fn new<S1: Into<String>, S2: Into<String>>(cluster_id: S1, node_pool_id: S2) -> Self {
        NodePoolId {
            cluster_id: cluster_id.into(),
            node_pool_id: node_pool_id.into(),
        }
    }

    pub fn encode(&self) -> Result<String> {
        encode(&[&self.cluster_id, &self.node_pool_id])
    }
}

impl FromStr for NodePoolId {
    type Err = FormatError;

    fn from_str(raw: &str) -> Result<Self> {
        let mut parts = decode(raw, 2)?.into_iter();
        match (parts.next(), parts.next()) {
            (Some(cluster_id), Some(node_pool_id)) => Ok(NodePoolId {
                cluster_id,
                node_pool_id,
            }),
            _ => WrongAritySnafu {
                raw,
                expected: 2usize,
                actual: 0usize,
            }
            .fail(),
        }
    }
}

impl fmt::Display for NodePoolId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}{}", self.cluster_id, ID_SEPARATOR, self.node_pool_id)
    }
}

/// Identifies an addon installed into a cluster: `clusterId#addonName`.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct AddonId {
    pub cluster_id: String,
    pub addon_name: String,
}

impl AddonId {
    pub fn new<S1: Into<String>, S2: Into<String>>(cluster_id: S1, addon_name: S2) -> Self {
        AddonId {
            cluster_id: cluster_id.into(),
            addon_name: addon_name.into(),
        }
    }

    pub fn encode(&self) -> Result<String> {
        encode(&[&self.cluster_id, &self.addon_name])
    }
}

impl FromStr for AddonId {
    type Err = FormatError;

    fn from_str(raw: &str) -> Result<Self> {
        let mut parts = decode(raw, 2)?.into_iter();
        match (parts.next(), parts.next()) {
            (Some(cluster_id), Some(addon_name)) => Ok(AddonId {
                cluster_id,
                addon_name,
            }),
            _ => WrongAritySnafu {
                raw,
                expected: 2usize,
                actual: 0usize,
            }
            .fail(),
        }
    }
}

impl fmt::Display for AddonId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}{}", self.cluster_id, ID_SEPARATOR, self.addon_name)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_decode_inverts_encode() {
        let test_cases = vec![
            vec!["cls-1", "np-1"],
            vec!["cls-xyz", "np-0a", "asg-9"],
            vec!["only"],
            vec!["zone-1", "cert.example.com"],
        ];

        for ids in test_cases {
            let encoded = encode(&ids).unwrap();
            let decoded = decode(&encoded, ids.len()).unwrap();
            assert_eq!(decoded, ids);
        }
    }

    #[test]
    fn test_decode_rejects_wrong_arity() {
        let test_cases = vec![("a#b#c", 2, 3), ("a", 2, 1), ("a#b", 3, 2)];

        for (raw, arity, actual) in test_cases {
            assert_eq!(
                decode(raw, arity),
                Err(FormatError::WrongArity {
                    raw: raw.to_string(),
                    expected: arity,
                    actual,
                })
            );
        }
    }

    #[test]
    fn test_decode_rejects_empty_parts() {
        assert!(matches!(
            decode("cls-1#", 2),
            Err(FormatError::EmptyPart { position: 1, .. })
        ));
        assert!(matches!(
            decode("#np-1", 2),
            Err(FormatError::EmptyPart { position: 0, .. })
        ));
    }

    #[test]
    fn test_encode_rejects_unencodable_parts() {
        assert!(matches!(
            encode(&["cls#1", "np-1"]),
            Err(FormatError::SeparatorInPart { .. })
        ));
        assert!(matches!(
            encode(&["cls-1", ""]),
            Err(FormatError::EmptyPart { position: 1, .. })
        ));
    }

    #[test]
    fn test_typed_ids_are_stable() {
        let id = NodePoolId::new("cls-1", "np-1");
        let encoded = id.encode().unwrap();
        assert_eq!(encoded, "cls-1#np-1");
        assert_eq!(encoded, id.to_string());
        assert_eq!(NodePoolId::from_str(&encoded).unwrap(), id);

        let addon = AddonId::new("cls-1", "tcr");
        assert_eq!(AddonId::from_str(&addon.encode().unwrap()).unwrap(), addon);
        assert!(AddonId::from_str("cls-1#tcr#extra").is_err());
    }
}
