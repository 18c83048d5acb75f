use std::path::Path;

use anyhow::{bail, Context, Result};
use sluice_shared::PipelineSource;

/// Pipeline definition text, loaded from the command line or from disk.
///
/// Only emptiness is checked here; interpreting the text is up to the
/// pipeline executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineDefinition {
    text: String,
    origin: String,
}

impl PipelineDefinition {
    pub async fn load(source: &PipelineSource) -> Result<Self> {
        let (text, origin) = match source {
            PipelineSource::Inline(text) => (text.clone(), source.describe()),
            PipelineSource::File(path) => (read_path(path).await?, source.describe()),
        };

        if text.trim().is_empty() {
            bail!("pipeline definition from {origin} is empty");
        }

        Ok(Self { text, origin })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }
}

/// A directory is read as the concatenation of its files, in name order.
async fn read_path(path: &Path) -> Result<String> {
    let meta = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    if !meta.is_dir() {
        return tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()));
    }

    let mut entries = tokio::fs::read_dir(path)
        .await
        .with_context(|| format!("listing {}", path.display()))?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();

    let mut text = String::new();
    for file in files {
        let part = tokio::fs::read_to_string(&file)
            .await
            .with_context(|| format!("reading {}", file.display()))?;
        text.push_str(&part);
        if !part.ends_with('\n') {
            text.push('\n');
        }
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn inline_definition() {
        let def = PipelineDefinition::load(&PipelineSource::Inline("input {} output {}".into()))
            .await
            .unwrap();
        assert_eq!(def.text(), "input {} output {}");
        assert_eq!(def.origin(), "inline");
    }

    #[tokio::test]
    async fn empty_definitions_are_rejected() {
        let err = PipelineDefinition::load(&PipelineSource::Inline("  \n".into()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("is empty"));

        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(
            PipelineDefinition::load(&PipelineSource::File(file.path().to_path_buf()))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.conf");
        let err = PipelineDefinition::load(&PipelineSource::File(path.clone()))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), format!("reading {}", path.display()));
    }

    #[tokio::test]
    async fn directory_is_concatenated_in_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("20-output.conf"), "output {}").unwrap();
        std::fs::write(dir.path().join("10-input.conf"), "input {}\n").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let def = PipelineDefinition::load(&PipelineSource::File(dir.path().to_path_buf()))
            .await
            .unwrap();
        assert_eq!(def.text(), "input {}\noutput {}\n");
    }
}
