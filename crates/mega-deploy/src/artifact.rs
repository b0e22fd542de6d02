//! Compiled contract artifacts and library linking.

use std::collections::BTreeMap;

use alloy_json_abi::JsonAbi;
use alloy_primitives::{hex, Address, Bytes};
use auto_impl::auto_impl;
use serde::{Deserialize, Serialize};

/// Errors of artifact loading and linking.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    /// No artifact with this id.
    #[error("artifact {0} not found")]
    NotFound(String),
    /// The artifact could not be read.
    #[error("failed to read artifact {id}: {reason}")]
    Read {
        /// Artifact id.
        id: String,
        /// What went wrong.
        reason: String,
    },
    /// The bytecode references a library that was not provided.
    #[error("{contract} needs library {library}, which was not provided")]
    MissingLibrary {
        /// Contract being linked.
        contract: String,
        /// Library name.
        library: String,
    },
    /// A library was provided that the bytecode does not reference.
    #[error("{contract} does not need library {library}")]
    UnneededLibrary {
        /// Contract being linked.
        contract: String,
        /// Library name.
        library: String,
    },
    /// A link reference points outside the bytecode.
    #[error("link reference of {library} at {start} is outside the bytecode of {contract}")]
    InvalidLinkReference {
        /// Contract being linked.
        contract: String,
        /// Library name.
        library: String,
        /// Byte offset.
        start: usize,
    },
    /// The (linked) bytecode is not valid hex.
    #[error("invalid bytecode for {contract}: {source}")]
    InvalidBytecode {
        /// Contract name.
        contract: String,
        /// Decode error.
        source: hex::FromHexError,
    },
}

/// Position of a library address placeholder in creation bytecode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkReference {
    /// Byte offset.
    pub start: usize,
    /// Byte length, always 20.
    pub length: usize,
}

/// A compiled contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    /// Contract name.
    pub contract_name: String,
    /// Creation bytecode as hex, possibly with unlinked library placeholders.
    pub bytecode: String,
    /// Contract ABI.
    pub abi: JsonAbi,
    /// Placeholders by source file, then by library name.
    #[serde(default)]
    pub link_references: BTreeMap<String, BTreeMap<String, Vec<LinkReference>>>,
}

impl Artifact {
    /// Returns whether the bytecode has library placeholders.
    pub fn needs_linking(&self) -> bool {
        self.link_references.values().any(|libraries| !libraries.is_empty())
    }

    /// Splices library addresses into the creation bytecode.
    ///
    /// Libraries are keyed either by bare name or by `source:name`.
    pub fn link(&self, libraries: &BTreeMap<String, Address>) -> Result<Bytes, ArtifactError> {
        let mut code = self.bytecode.strip_prefix("0x").unwrap_or(&self.bytecode).to_string();
        // link references are byte offsets
        if let Some((index, c)) = code.char_indices().find(|(_, c)| !c.is_ascii()) {
            return Err(ArtifactError::InvalidBytecode {
                contract: self.contract_name.clone(),
                source: hex::FromHexError::InvalidHexCharacter { c, index },
            });
        }
        let mut used = 0;

        for (source, references) in &self.link_references {
            for (library, positions) in references {
                let address = libraries
                    .get(library)
                    .or_else(|| libraries.get(&format!("{source}:{library}")))
                    .ok_or_else(|| ArtifactError::MissingLibrary {
                        contract: self.contract_name.clone(),
                        library: library.clone(),
                    })?;
                used += 1;
                let encoded = hex::encode(address);
                for position in positions {
                    let range = position.start * 2..(position.start + position.length) * 2;
                    if range.end > code.len() || position.length != 20 {
                        return Err(ArtifactError::InvalidLinkReference {
                            contract: self.contract_name.clone(),
                            library: library.clone(),
                            start: position.start,
                        });
                    }
                    code.replace_range(range, &encoded);
                }
            }
        }

        if used < libraries.len() {
            let referenced = |name: &str| {
                self.link_references.iter().any(|(source, refs)| {
                    refs.contains_key(name)
                        || name
                            .split_once(':')
                            .is_some_and(|(s, l)| s == source && refs.contains_key(l))
                })
            };
            if let Some(library) = libraries.keys().find(|name| !referenced(name)) {
                return Err(ArtifactError::UnneededLibrary {
                    contract: self.contract_name.clone(),
                    library: library.clone(),
                });
            }
        }

        hex::decode(&code)
            .map(Bytes::from)
            .map_err(|source| ArtifactError::InvalidBytecode {
                contract: self.contract_name.clone(),
                source,
            })
    }
}

/// Loads artifacts by id.
#[auto_impl(&, Box, Arc)]
pub trait ArtifactLoader {
    /// Loads the artifact with the given id.
    fn load_artifact(&self, artifact_id: &str) -> Result<Artifact, ArtifactError>;
}

impl ArtifactLoader for BTreeMap<String, Artifact> {
    fn load_artifact(&self, artifact_id: &str) -> Result<Artifact, ArtifactError> {
        self.get(artifact_id)
            .cloned()
            .ok_or_else(|| ArtifactError::NotFound(artifact_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::address;

    use super::*;

    fn artifact_with_library() -> Artifact {
        serde_json::from_value(serde_json::json!({
            "contractName": "UsesMath",
            "bytecode": "0x6073__$a1b2c3d4e5f6a7b8c9d0e1f2a3b4c5d6e7$__6000",
            "abi": [],
            "linkReferences": {
                "contracts/Math.sol": {"Math": [{"start": 2, "length": 20}]}
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_link_splices_address() {
        let artifact = artifact_with_library();
        assert!(artifact.needs_linking());
        let math = address!("5fbdb2315678afecb367f032d93f642f64180aa3");

        let linked = artifact.link(&BTreeMap::from([("Math".to_string(), math)])).unwrap();
        assert_eq!(linked.len(), 24);
        assert_eq!(&linked[2..22], math.as_slice());

        let qualified = BTreeMap::from([("contracts/Math.sol:Math".to_string(), math)]);
        assert_eq!(artifact.link(&qualified).unwrap(), linked);
    }

    #[test]
    fn test_link_errors() {
        let artifact = artifact_with_library();
        assert!(matches!(
            artifact.link(&BTreeMap::new()),
            Err(ArtifactError::MissingLibrary { .. })
        ));

        let extra = BTreeMap::from([
            ("Math".to_string(), Address::ZERO),
            ("Other".to_string(), Address::ZERO),
        ]);
        assert!(matches!(
            artifact.link(&extra),
            Err(ArtifactError::UnneededLibrary { library, .. }) if library == "Other"
        ));

        // Unlinked placeholders are not hex.
        let unlinked = Artifact { link_references: BTreeMap::new(), ..artifact };
        assert!(matches!(
            unlinked.link(&BTreeMap::new()),
            Err(ArtifactError::InvalidBytecode { .. })
        ));
    }

    #[test]
    fn test_link_rejects_non_ascii_bytecode() {
        let artifact = Artifact {
            bytecode: "0x6é__$a1b2c3d4e5f6a7b8c9d0e1f2a3b4c5d6e7$__".to_string(),
            ..artifact_with_library()
        };
        let libraries = BTreeMap::from([("Math".to_string(), Address::ZERO)]);
        assert!(matches!(
            artifact.link(&libraries),
            Err(ArtifactError::InvalidBytecode {
                source: hex::FromHexError::InvalidHexCharacter { c: 'é', index: 1 },
                ..
            })
        ));
    }
}
