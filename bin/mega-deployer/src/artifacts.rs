use std::path::{Path, PathBuf};

use mega_deploy::{Artifact, ArtifactError, ArtifactLoader};
use tracing::trace;

/// Loads compiled artifacts from `<dir>/<artifact id>.json`.
///
/// The files use the Hardhat artifact layout (`contractName`, `bytecode`, `abi`,
/// `linkReferences`).
#[derive(Debug, Clone)]
pub struct FsArtifactLoader {
    dir: PathBuf,
}

impl FsArtifactLoader {
    /// Creates a loader reading from `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the artifact with the given id.
    pub fn path(&self, artifact_id: &str) -> PathBuf {
        self.dir.join(format!("{artifact_id}.json"))
    }

    /// The artifacts directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ArtifactLoader for FsArtifactLoader {
    fn load_artifact(&self, artifact_id: &str) -> Result<Artifact, ArtifactError> {
        // ids come from the futures file; keep them inside the directory
        if artifact_id.is_empty()
            || artifact_id.contains(['/', '\\'])
            || artifact_id.starts_with('.')
        {
            return Err(ArtifactError::NotFound(artifact_id.to_string()));
        }
        let path = self.path(artifact_id);
        trace!(path = %path.display(), "Loading artifact");
        let contents = match std::fs::read(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ArtifactError::NotFound(artifact_id.to_string()))
            }
            Err(err) => return Err(read_error(artifact_id, &err)),
        };
        serde_json::from_slice(&contents).map_err(|err| read_error(artifact_id, &err))
    }
}

fn read_error(artifact_id: &str, err: &dyn std::error::Error) -> ArtifactError {
    ArtifactError::Read { id: artifact_id.to_string(), reason: err.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loads_artifact_by_id() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("Counter.json"),
            r#"{"contractName":"Counter","bytecode":"0x6080","abi":[]}"#,
        )
        .unwrap();
        let loader = FsArtifactLoader::new(dir.path());

        let artifact = loader.load_artifact("Counter").unwrap();
        assert_eq!(artifact.contract_name, "Counter");
        assert!(!artifact.needs_linking());
    }

    #[test]
    fn test_artifact_errors() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Broken.json"), "{").unwrap();
        let loader = FsArtifactLoader::new(dir.path());

        assert!(matches!(loader.load_artifact("Missing"), Err(ArtifactError::NotFound(_))));
        assert!(matches!(loader.load_artifact("../Counter"), Err(ArtifactError::NotFound(_))));
        assert!(matches!(
            loader.load_artifact("Broken"),
            Err(ArtifactError::Read { id, .. }) if id == "Broken"
        ));
    }
}
