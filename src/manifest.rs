//! Model and plugin list parsing
//!
//! Both lists are flat text files with one token per line. Blank lines and
//! lines starting with `#` are ignored.
//!
//! Model identifiers come in two recognised shapes:
//!
//! ```text
//! urn:air:sdxl:checkpoint:civitai:133005@357609           -> Civitai downloader
//! urn:air:flux:diffusion_models:hf:org/repo@file.safetensors -> Hugging Face
//!  0   1   2         3           4         5
//! ```
//!
//! For Hugging Face tokens segment 3 is the target subdirectory inside the
//! cache volume and segment 5 is `<repo_id>@<filename>`.

use crate::error::{DeployError, DeployResult};
use serde::Serialize;
use std::path::{Component, Path};

/// Where a model identifier is downloaded from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelSource {
    /// Passed verbatim to the Civitai downloader
    Civitai { urn: String },
    HuggingFace {
        subdir: String,
        repo_id: String,
        filename: String,
    },
    /// Logged and skipped
    Unknown { raw: String },
}

impl ModelSource {
    /// Classify a single already-trimmed, non-comment token
    pub fn classify(token: &str) -> Self {
        if token.contains("civitai") {
            return Self::Civitai {
                urn: token.to_string(),
            };
        }

        if token.contains(":hf:") {
            if let Some(source) = parse_hf_token(token) {
                return source;
            }
            tracing::debug!(token = %token, "Malformed hf identifier");
        }

        Self::Unknown {
            raw: token.to_string(),
        }
    }

    /// Short label used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Civitai { .. } => "civitai",
            Self::HuggingFace { .. } => "huggingface",
            Self::Unknown { .. } => "unknown",
        }
    }
}

fn parse_hf_token(token: &str) -> Option<ModelSource> {
    let segments: Vec<&str> = token.split(':').collect();
    let subdir = segments.get(3)?;
    let (repo_id, filename) = segments.get(5)?.split_once('@')?;

    if subdir.is_empty() || repo_id.is_empty() || filename.is_empty() {
        return None;
    }

    // Both are joined onto the cache root and must stay under it
    if !is_contained(subdir) || !is_contained(filename) {
        return None;
    }

    Some(ModelSource::HuggingFace {
        subdir: subdir.to_string(),
        repo_id: repo_id.to_string(),
        filename: filename.to_string(),
    })
}

/// Relative path made only of normal components, no root and no `..`
fn is_contained(path: &str) -> bool {
    Path::new(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// A classified model identifier with its position in the list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    /// 1-based line number
    pub line: usize,
    pub source: ModelSource,
}

/// Parsed model list
#[derive(Debug, Clone, Default, Serialize)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
    /// Blank and comment lines
    pub skipped_lines: usize,
}

impl Manifest {
    pub fn parse(content: &str) -> Self {
        let mut manifest = Manifest::default();

        for (idx, line) in content.lines().enumerate() {
            match meaningful(line) {
                Some(token) => manifest.entries.push(ManifestEntry {
                    line: idx + 1,
                    source: ModelSource::classify(token),
                }),
                None => manifest.skipped_lines += 1,
            }
        }

        manifest
    }

    pub fn load(path: &Path) -> DeployResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| DeployError::ListRead {
            kind: "model",
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::parse(&content))
    }

    pub fn count(&self, kind: &str) -> usize {
        self.entries
            .iter()
            .filter(|e| e.source.kind() == kind)
            .count()
    }
}

/// Strip a line down to its token, or None for blank and comment lines
fn meaningful(line: &str) -> Option<&str> {
    let token = line.trim();
    if token.is_empty() || token.starts_with('#') {
        None
    } else {
        Some(token)
    }
}

/// Parse a plugin list into plugin names in file order
pub fn parse_plugins(content: &str) -> Vec<String> {
    content
        .lines()
        .filter_map(meaningful)
        .map(str::to_string)
        .collect()
}

/// Load the plugin list. A missing file means no plugins.
pub fn load_plugins(path: &Path) -> DeployResult<Vec<String>> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(parse_plugins(&content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path = ?path, "No plugin list found, building without plugins");
            Ok(Vec::new())
        }
        Err(source) => Err(DeployError::ListRead {
            kind: "plugin",
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_civitai_token_kept_verbatim() {
        let token = "urn:air:sdxl:checkpoint:civitai:133005@357609";
        assert_eq!(
            ModelSource::classify(token),
            ModelSource::Civitai {
                urn: token.to_string()
            }
        );
    }

    #[test]
    fn test_hf_token_positional_split() {
        let source = ModelSource::classify(
            "urn:air:flux:diffusion_models:hf:black-forest-labs/FLUX.1-schnell@flux1-schnell.safetensors",
        );
        assert_eq!(
            source,
            ModelSource::HuggingFace {
                subdir: "diffusion_models".to_string(),
                repo_id: "black-forest-labs/FLUX.1-schnell".to_string(),
                filename: "flux1-schnell.safetensors".to_string(),
            }
        );
    }

    #[test]
    fn test_civitai_wins_over_hf() {
        let source = ModelSource::classify("a:b:c:loras:hf:civitai@x");
        assert_eq!(source.kind(), "civitai");
    }

    #[test]
    fn test_hf_must_be_a_whole_segment() {
        assert_eq!(ModelSource::classify("a:b:c:d:hfx:repo@file").kind(), "unknown");
        assert_eq!(ModelSource::classify("https://hf.co/repo").kind(), "unknown");
    }

    #[test]
    fn test_malformed_hf_is_unknown() {
        // too few segments
        assert_eq!(ModelSource::classify("a:hf:c").kind(), "unknown");
        // no @ in the repo segment
        assert_eq!(ModelSource::classify("a:b:c:vae:hf:repo-file").kind(), "unknown");
        // empty filename
        assert_eq!(ModelSource::classify("a:b:c:vae:hf:repo@").kind(), "unknown");
    }

    #[test]
    fn test_hf_paths_outside_cache_are_unknown() {
        assert_eq!(ModelSource::classify("x:y:z:/etc/cron.d:hf:REPO@FILE").kind(), "unknown");
        assert_eq!(ModelSource::classify("x:y:z:../..:hf:REPO@FILE").kind(), "unknown");
        assert_eq!(ModelSource::classify("x:y:z:loras/../..:hf:REPO@FILE").kind(), "unknown");
        assert_eq!(ModelSource::classify("x:y:z:vae:hf:REPO@../../etc/passwd").kind(), "unknown");
        assert_eq!(ModelSource::classify("x:y:z:vae:hf:REPO@/etc/passwd").kind(), "unknown");

        // nested relative paths are fine
        assert_eq!(
            ModelSource::classify("x:y:z:loras/sdxl:hf:REPO@sub/FILE").kind(),
            "huggingface"
        );
    }

    #[test]
    fn test_filename_keeps_later_at_signs() {
        let source = ModelSource::classify("a:b:c:vae:hf:org/repo@sub/dir@v2.bin");
        assert_eq!(
            source,
            ModelSource::HuggingFace {
                subdir: "vae".to_string(),
                repo_id: "org/repo".to_string(),
                filename: "sub/dir@v2.bin".to_string(),
            }
        );
    }

    #[test]
    fn test_manifest_skips_blank_and_comments() {
        let manifest = Manifest::parse(
            "# checkpoints\n\n   \nurn:air:sdxl:checkpoint:civitai:1@2\n  # indented comment\nnot-a-model\n",
        );

        assert_eq!(manifest.skipped_lines, 4);
        assert_eq!(manifest.entries.len(), 2);
        assert_eq!(manifest.entries[0].line, 4);
        assert_eq!(manifest.entries[1].line, 6);
        assert_eq!(manifest.count("civitai"), 1);
        assert_eq!(manifest.count("unknown"), 1);
    }

    #[test]
    fn test_manifest_trims_whitespace() {
        let manifest = Manifest::parse("  urn:air:sdxl:lora:civitai:5@6  \r\n");
        assert_eq!(
            manifest.entries[0].source,
            ModelSource::Civitai {
                urn: "urn:air:sdxl:lora:civitai:5@6".to_string()
            }
        );
    }

    #[test]
    fn test_parse_plugins() {
        let plugins = parse_plugins("# nodes\ncomfyui-impact-pack\n\nrgthree-comfy\n");
        assert_eq!(plugins, vec!["comfyui-impact-pack", "rgthree-comfy"]);
    }

    #[test]
    fn test_load_plugins_missing_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let plugins = load_plugins(&temp_dir.path().join("nodes.txt")).unwrap();
        assert!(plugins.is_empty());
    }

    #[test]
    fn test_load_manifest_missing_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let err = Manifest::load(&temp_dir.path().join("models.txt")).unwrap_err();
        assert!(matches!(err, DeployError::ListRead { kind: "model", .. }));
    }
}
