//! Solidity compilation through an external `solc` binary.
//!
//! The compiler is driven with the standard-json interface. Its raw output, the creation
//! bytecode and the ABI are persisted next to each other so operators can inspect them:
//!
//! ```text
//! <artifacts_dir>/compiled_code.json
//! <artifacts_dir>/bytecode.txt
//! <artifacts_dir>/abi.json
//! ```

use std::{
    path::{Path, PathBuf},
    process::Stdio,
};

use alloy_core::{json_abi::JsonAbi, primitives::Bytes};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;

use crate::{CompilationError, DeployError};

/// Default solc release used when none is configured.
pub const DEFAULT_SOLC_VERSION: &str = "0.6.0";

/// File name of the raw standard-json output.
pub const COMPILED_CODE_FILENAME: &str = "compiled_code.json";
/// File name of the hex encoded creation bytecode.
pub const BYTECODE_FILENAME: &str = "bytecode.txt";
/// File name of the contract ABI.
pub const ABI_FILENAME: &str = "abi.json";

/// Output selection requested from solc.
const OUTPUT_SELECTION: &[&str] = &["abi", "metadata", "evm.bytecode", "evm.bytecode.sourceMap"];

/// A Solidity source file loaded in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Key of the file in the standard-json `sources` map.
    pub file_name: String,
    pub content: String,
}

impl SourceFile {
    pub async fn read(path: &Path) -> Result<Self, CompilationError> {
        let content =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| CompilationError::ReadSource {
                    path: path.to_path_buf(),
                    source,
                })?;

        Ok(Self::from_content(path, content))
    }

    pub fn from_content(path: &Path, content: impl Into<String>) -> Self {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Self {
            path: path.to_path_buf(),
            file_name,
            content: content.into(),
        }
    }

    /// Build the standard-json compiler input for this file.
    pub fn standard_json_input(&self) -> Value {
        serde_json::json!({
            "language": "Solidity",
            "sources": {
                self.file_name.as_str(): { "content": self.content }
            },
            "settings": {
                "outputSelection": {
                    "*": { "*": OUTPUT_SELECTION }
                }
            }
        })
    }
}

/// Compiled contract: creation bytecode, ABI and the raw compiler output.
#[derive(Debug, Clone)]
pub struct CompiledArtifact {
    pub contract_name: String,
    /// Hex encoded creation bytecode, without `0x` prefix. Empty for abstract contracts.
    pub bytecode: String,
    pub abi: JsonAbi,
    pub raw_output: Value,
}

impl CompiledArtifact {
    /// Extract `contract` of `file_name` from a solc standard-json output.
    pub fn from_standard_json(
        raw_output: Value,
        file_name: &str,
        contract: &str,
    ) -> Result<Self, CompilationError> {
        let mut messages = Vec::new();
        for diagnostic in raw_output["errors"].as_array().into_iter().flatten() {
            let message = diagnostic["formattedMessage"]
                .as_str()
                .or_else(|| diagnostic["message"].as_str())
                .unwrap_or("unknown compiler diagnostic")
                .trim()
                .to_string();

            if diagnostic["severity"].as_str() == Some("error") {
                messages.push(message);
            } else {
                tracing::warn!(file = file_name, "{}", message);
            }
        }
        if !messages.is_empty() {
            return Err(CompilationError::Diagnostics { messages });
        }

        let entry = raw_output["contracts"][file_name]
            .get(contract)
            .ok_or_else(|| CompilationError::ContractNotFound {
                file: file_name.to_string(),
                contract: contract.to_string(),
            })?;

        let bytecode = entry["evm"]["bytecode"]["object"]
            .as_str()
            .ok_or_else(|| {
                CompilationError::MalformedOutput("missing evm.bytecode.object".to_string())
            })?
            .trim_start_matches("0x")
            .to_string();
        validate_bytecode(&bytecode)?;

        let abi = extract_abi(entry)?;

        Ok(Self {
            contract_name: contract.to_string(),
            bytecode,
            abi,
            raw_output,
        })
    }

    /// Creation bytecode as raw bytes.
    pub fn bytecode_bytes(&self) -> Result<Bytes, CompilationError> {
        hex::decode(&self.bytecode)
            .map(Bytes::from)
            .map_err(|e| CompilationError::MalformedOutput(format!("bytecode is not hex: {e}")))
    }

    /// Write `compiled_code.json`, `bytecode.txt` and `abi.json` into `dir`.
    pub async fn persist(&self, dir: &Path) -> Result<(), DeployError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| DeployError::io(dir, e))?;

        write_json(&dir.join(COMPILED_CODE_FILENAME), &self.raw_output).await?;

        let bytecode_path = dir.join(BYTECODE_FILENAME);
        tokio::fs::write(&bytecode_path, &self.bytecode)
            .await
            .map_err(|e| DeployError::io(&bytecode_path, e))?;

        write_json(&dir.join(ABI_FILENAME), &self.abi).await?;

        tracing::debug!(dir = %dir.display(), "Compiler artifacts saved");
        Ok(())
    }
}

/// Bytecode must be an even number of hex digits. Library placeholders (`__$...$__`) fail
/// this check since the run has no linker.
fn validate_bytecode(bytecode: &str) -> Result<(), CompilationError> {
    if bytecode.len() % 2 != 0 {
        return Err(CompilationError::MalformedOutput(format!(
            "bytecode has odd length {}",
            bytecode.len()
        )));
    }
    if !bytecode.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(CompilationError::MalformedOutput(
            "bytecode contains non-hex characters (unlinked library?)".to_string(),
        ));
    }
    Ok(())
}

/// Read the ABI from the metadata blob, falling back to the top-level `abi` field.
fn extract_abi(entry: &Value) -> Result<JsonAbi, CompilationError> {
    let from_metadata = entry["metadata"]
        .as_str()
        .and_then(|metadata| serde_json::from_str::<Value>(metadata).ok())
        .map(|metadata| metadata["output"]["abi"].clone())
        .filter(|abi| abi.is_array());

    let abi = match from_metadata {
        Some(abi) => abi,
        None => entry
            .get("abi")
            .filter(|abi| abi.is_array())
            .cloned()
            .ok_or_else(|| CompilationError::MalformedOutput("missing contract ABI".to_string()))?,
    };

    serde_json::from_value(abi)
        .map_err(|e| CompilationError::MalformedOutput(format!("invalid ABI: {e}")))
}

/// Write `value` as JSON indented with four spaces.
pub(crate) async fn write_json<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> Result<(), DeployError> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value
        .serialize(&mut serializer)
        .map_err(|e| DeployError::io(path, std::io::Error::other(e)))?;

    tokio::fs::write(path, buf)
        .await
        .map_err(|e| DeployError::io(path, e))
}

/// Turns Solidity source into a [`CompiledArtifact`].
#[async_trait]
pub trait Compiler: Send + Sync {
    async fn compile(
        &self,
        source: &SourceFile,
        contract: &str,
    ) -> Result<CompiledArtifact, CompilationError>;
}

/// A `solc` binary pinned to one release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Solc {
    version: String,
    binary: PathBuf,
}

impl Solc {
    /// Find a solc binary matching `version`.
    ///
    /// Looks at `explicit` first, then the solcx and svm install layouts under the home
    /// directory, then `solc` on `PATH`. Each candidate must report `version` in its
    /// `--version` output. When nothing matches and `install` is set, the release is
    /// downloaded into the svm layout. An explicit binary is never replaced by a download.
    pub async fn resolve(
        version: &str,
        explicit: Option<&Path>,
        install: bool,
    ) -> Result<Self, CompilationError> {
        let mut tried = Vec::new();

        for candidate in Self::candidates(version, explicit) {
            match reported_version(&candidate).await {
                Some(reported) if reported.contains(&format!("{version}+")) => {
                    tracing::info!(
                        binary = %candidate.display(),
                        version,
                        "Using solc"
                    );
                    return Ok(Self {
                        version: version.to_string(),
                        binary: candidate,
                    });
                }
                Some(reported) => {
                    tried.push(format!("{} reports {}", candidate.display(), reported.trim()));
                }
                None => tried.push(format!("{} not runnable", candidate.display())),
            }
        }

        if install && explicit.is_none() {
            return Self::install(version).await;
        }

        Err(CompilationError::VersionUnavailable {
            version: version.to_string(),
            detail: tried.join("; "),
        })
    }

    /// Download `version` with svm.
    pub async fn install(version: &str) -> Result<Self, CompilationError> {
        let install_error = |reason: String| CompilationError::Install {
            version: version.to_string(),
            reason,
        };

        let parsed = semver::Version::parse(version).map_err(|e| install_error(e.to_string()))?;

        tracing::info!(version, "Installing Solidity compiler...");
        let binary = svm::install(&parsed)
            .await
            .map_err(|e| install_error(e.to_string()))?;
        tracing::info!(binary = %binary.display(), version, "Solidity compiler installed");

        Ok(Self {
            version: version.to_string(),
            binary,
        })
    }

    /// Use `binary` as is, without checking its version.
    pub fn from_binary(version: impl Into<String>, binary: impl Into<PathBuf>) -> Self {
        Self {
            version: version.into(),
            binary: binary.into(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn candidates(version: &str, explicit: Option<&Path>) -> Vec<PathBuf> {
        if let Some(path) = explicit {
            return vec![path.to_path_buf()];
        }

        let mut candidates = Vec::new();
        if let Some(home) = dirs::home_dir() {
            candidates.push(home.join(".solcx").join(format!("solc-v{version}")));
            candidates.push(home.join(".svm").join(version).join(format!("solc-{version}")));
        }
        // svm moves to the XDG data dir when `~/.svm` does not exist.
        let installed = svm::version_binary(version);
        if !candidates.contains(&installed) {
            candidates.push(installed);
        }
        candidates.push(PathBuf::from("solc"));
        candidates
    }
}

/// Run `<binary> --version`, returning stdout on success.
async fn reported_version(binary: &Path) -> Option<String> {
    let output = tokio::process::Command::new(binary)
        .arg("--version")
        .stdin(Stdio::null())
        .output()
        .await
        .ok()?;

    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).into_owned())
}

#[async_trait]
impl Compiler for Solc {
    async fn compile(
        &self,
        source: &SourceFile,
        contract: &str,
    ) -> Result<CompiledArtifact, CompilationError> {
        tracing::info!(
            source = %source.path.display(),
            contract,
            version = %self.version,
            "Compiling contract..."
        );

        let input = serde_json::to_vec(&source.standard_json_input())
            .map_err(|e| CompilationError::MalformedOutput(e.to_string()))?;

        let spawn_error = |source| CompilationError::Spawn {
            binary: self.binary.clone(),
            source,
        };

        let mut child = tokio::process::Command::new(&self.binary)
            .arg("--standard-json")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&input).await.map_err(spawn_error)?;
            // Dropping stdin closes the pipe so solc starts compiling.
        }

        let output = child.wait_with_output().await.map_err(spawn_error)?;

        if !output.status.success() {
            return Err(CompilationError::CompilerExited {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let raw_output: Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| CompilationError::MalformedOutput(e.to_string()))?;

        CompiledArtifact::from_standard_json(raw_output, &source.file_name, contract)
    }
}
