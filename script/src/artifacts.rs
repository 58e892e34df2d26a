//! Circuit artifacts: the circuit program plus its proving and verifying keys.
//!
//! Keys are opaque byte buffers tagged with the circuit they belong to. The tag's checksum is
//! keccak256 of the verifying key bytes, so a proving key and verifying key agree only when
//! they were produced by the same setup.
//!
//! On disk an artifact set is described by a `manifest.json`:
//!
//! ```json
//! {
//!   "version": 1,
//!   "checksum": "0x…",
//!   "program": "withdraw-program.elf",
//!   "program_checksum": "0x…",
//!   "proving_key": "withdraw.pk",
//!   "proving_key_checksum": "0x…",
//!   "verifying_key": "withdraw.vk"
//! }
//! ```
//!
//! Paths are relative to the manifest's directory. Every file is checked against its keccak256
//! checksum on load, so a proving key swapped in next to a matching verifying key is refused
//! before it reaches a backend.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use mixer_lib::{keccak256, CircuitSchema};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Identifies one circuit build: schema version plus verifying-key checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CircuitId {
    pub version: u32,
    pub checksum: [u8; 32],
}

impl CircuitId {
    pub fn for_verifying_key(version: u32, verifying_key: &[u8]) -> Self {
        CircuitId {
            version,
            checksum: keccak256(verifying_key),
        }
    }
}

impl fmt::Display for CircuitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}/0x{}", self.version, hex::encode(&self.checksum[..8]))
    }
}

/// Key material consumed by a proving backend. For SP1 this is the guest ELF,
/// from which the backend derives its proving key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvingKey {
    pub circuit: CircuitId,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyingKey {
    pub circuit: CircuitId,
    pub bytes: Vec<u8>,
}

impl VerifyingKey {
    /// Tag `bytes` for schema `version`, deriving the checksum.
    pub fn new(version: u32, bytes: Vec<u8>) -> Self {
        VerifyingKey {
            circuit: CircuitId::for_verifying_key(version, &bytes),
            bytes,
        }
    }
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("manifest declares unknown circuit version {0}")]
    UnknownVersion(u32),

    #[error("invalid checksum encoding: {0}")]
    BadChecksum(String),

    #[error("checksum mismatch for {path}: manifest {expected}, file {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
}

/// Loaded artifact set for one circuit version.
#[derive(Debug, Clone)]
pub struct CircuitArtifacts {
    pub schema: CircuitSchema,
    pub program: Vec<u8>,
    pub proving_key: ProvingKey,
    pub verifying_key: VerifyingKey,
}

impl CircuitArtifacts {
    pub fn circuit(&self) -> CircuitId {
        self.verifying_key.circuit
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub version: u32,
    /// Hex keccak256 of the verifying key file.
    pub checksum: String,
    pub program: PathBuf,
    pub program_checksum: String,
    pub proving_key: PathBuf,
    pub proving_key_checksum: String,
    pub verifying_key: PathBuf,
}

impl ArtifactManifest {
    pub fn read(path: &Path) -> Result<Self, ArtifactError> {
        let raw = read_file(path)?;
        serde_json::from_slice(&raw).map_err(|source| ArtifactError::Manifest {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load every file the manifest names and check each against its checksum.
    pub fn load(path: &Path) -> Result<CircuitArtifacts, ArtifactError> {
        let manifest = Self::read(path)?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));

        let schema = *CircuitSchema::by_version(manifest.version)
            .ok_or(ArtifactError::UnknownVersion(manifest.version))?;

        let program = read_checked(&dir.join(&manifest.program), &manifest.program_checksum)?;
        let pk_bytes = read_checked(
            &dir.join(&manifest.proving_key),
            &manifest.proving_key_checksum,
        )?;
        let vk_bytes = read_checked(&dir.join(&manifest.verifying_key), &manifest.checksum)?;

        let verifying_key = VerifyingKey::new(manifest.version, vk_bytes);
        info!(circuit = %verifying_key.circuit, "loaded circuit artifacts");

        Ok(CircuitArtifacts {
            schema,
            program,
            proving_key: ProvingKey {
                circuit: verifying_key.circuit,
                bytes: pk_bytes,
            },
            verifying_key,
        })
    }

    /// Write the key files and a manifest into `dir`, returning the manifest path.
    pub fn write(
        dir: &Path,
        name: &str,
        program: &[u8],
        proving_key: &ProvingKey,
        verifying_key: &VerifyingKey,
    ) -> Result<PathBuf, ArtifactError> {
        let manifest = ArtifactManifest {
            version: verifying_key.circuit.version,
            checksum: format!("0x{}", hex::encode(verifying_key.circuit.checksum)),
            program: PathBuf::from(format!("{name}.elf")),
            program_checksum: format!("0x{}", hex::encode(keccak256(program))),
            proving_key: PathBuf::from(format!("{name}.pk")),
            proving_key_checksum: format!("0x{}", hex::encode(keccak256(&proving_key.bytes))),
            verifying_key: PathBuf::from(format!("{name}.vk")),
        };

        write_file(&dir.join(&manifest.program), program)?;
        write_file(&dir.join(&manifest.proving_key), &proving_key.bytes)?;
        write_file(&dir.join(&manifest.verifying_key), &verifying_key.bytes)?;

        let path = dir.join("manifest.json");
        let json = serde_json::to_vec_pretty(&manifest).map_err(|source| ArtifactError::Manifest {
            path: path.clone(),
            source,
        })?;
        write_file(&path, &json)?;
        debug!(path = %path.display(), "wrote artifact manifest");
        Ok(path)
    }
}

fn decode_checksum(s: &str) -> Result<[u8; 32], ArtifactError> {
    let raw = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(raw).map_err(|e| ArtifactError::BadChecksum(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| ArtifactError::BadChecksum(format!("expected 32 bytes, got {}", b.len())))
}

fn read_checked(path: &Path, checksum: &str) -> Result<Vec<u8>, ArtifactError> {
    let expected = decode_checksum(checksum)?;
    let bytes = read_file(path)?;
    let actual = keccak256(&bytes);
    if actual != expected {
        return Err(ArtifactError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: checksum.to_string(),
            actual: format!("0x{}", hex::encode(actual)),
        });
    }
    Ok(bytes)
}

fn read_file(path: &Path) -> Result<Vec<u8>, ArtifactError> {
    fs::read(path).map_err(|source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), ArtifactError> {
    fs::write(path, bytes).map_err(|source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn keys() -> (ProvingKey, VerifyingKey) {
        let vk = VerifyingKey::new(1, b"verifying key".to_vec());
        let pk = ProvingKey {
            circuit: vk.circuit,
            bytes: b"proving key".to_vec(),
        };
        (pk, vk)
    }

    #[test]
    fn test_manifest_roundtrip() {
        let dir = tempdir().unwrap();
        let (pk, vk) = keys();
        let path = ArtifactManifest::write(dir.path(), "withdraw", b"elf", &pk, &vk).unwrap();

        let artifacts = ArtifactManifest::load(&path).unwrap();
        assert_eq!(artifacts.schema, mixer_lib::WITHDRAW_V1);
        assert_eq!(artifacts.program, b"elf");
        assert_eq!(artifacts.proving_key, pk);
        assert_eq!(artifacts.verifying_key, vk);
        assert_eq!(artifacts.circuit().checksum, keccak256(b"verifying key"));
    }

    #[test]
    fn test_tampered_verifying_key_rejected() {
        let dir = tempdir().unwrap();
        let (pk, vk) = keys();
        let path = ArtifactManifest::write(dir.path(), "withdraw", b"elf", &pk, &vk).unwrap();
        fs::write(dir.path().join("withdraw.vk"), b"other key").unwrap();

        assert!(matches!(
            ArtifactManifest::load(&path),
            Err(ArtifactError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_swapped_proving_key_rejected() {
        let dir = tempdir().unwrap();
        let (pk, vk) = keys();
        let path = ArtifactManifest::write(dir.path(), "withdraw", b"elf", &pk, &vk).unwrap();
        fs::write(dir.path().join("withdraw.pk"), b"another circuit's key").unwrap();

        match ArtifactManifest::load(&path) {
            Err(ArtifactError::ChecksumMismatch { path, .. }) => {
                assert_eq!(path, dir.path().join("withdraw.pk"))
            }
            other => panic!("expected checksum mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_swapped_program_rejected() {
        let dir = tempdir().unwrap();
        let (pk, vk) = keys();
        let path = ArtifactManifest::write(dir.path(), "withdraw", b"elf", &pk, &vk).unwrap();
        fs::write(dir.path().join("withdraw.elf"), b"other elf").unwrap();

        assert!(matches!(
            ArtifactManifest::load(&path),
            Err(ArtifactError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let dir = tempdir().unwrap();
        let vk = VerifyingKey::new(7, b"vk".to_vec());
        let pk = ProvingKey {
            circuit: vk.circuit,
            bytes: Vec::new(),
        };
        let path = ArtifactManifest::write(dir.path(), "withdraw", b"elf", &pk, &vk).unwrap();
        assert!(matches!(
            ArtifactManifest::load(&path),
            Err(ArtifactError::UnknownVersion(7))
        ));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            ArtifactManifest::load(&dir.path().join("manifest.json")),
            Err(ArtifactError::Io { .. })
        ));
    }

    #[test]
    fn test_circuit_id_display() {
        let id = CircuitId {
            version: 1,
            checksum: [0xAB; 32],
        };
        assert_eq!(id.to_string(), "v1/0xabababababababab");
    }
}
