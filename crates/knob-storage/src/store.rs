//! Sealed file store
//!
//! Revocation and decryption of the same name must not interleave: callers
//! hold a single writer per name. Each object is written to a staging path
//! and renamed into place when the backend can rename, so a reader sees
//! either the old or the new object. A write that fails halfway through a
//! file or a batch restores the objects it already replaced.

use anyhow::{Context, Result};
use knob_crypto::format::HEADER_SIZE;
use knob_crypto::{Header, Index, MetadataBundle};
use opendal::Operator;

const CIPHERTEXT_SUFFIX: &str = ".knob";
const BUNDLE_SUFFIX: &str = ".bundle.json";
const STAGING_SUFFIX: &str = ".partial";

/// Ciphertext and bundle of one stored file
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub ciphertext: Vec<u8>,
    pub bundle: MetadataBundle,
}

/// One ciphertext swap in a batch revocation
#[derive(Debug, Clone, Copy)]
pub struct Replacement<'a> {
    pub name: &'a str,
    /// Ciphertext currently stored, restored if the batch fails
    pub previous: &'a [u8],
    pub next: &'a [u8],
}

pub struct SealedStore {
    op: Operator,
}

impl SealedStore {
    pub fn new(op: Operator) -> Self {
        Self { op }
    }

    pub fn ciphertext_path(name: &str) -> String {
        format!("{name}{CIPHERTEXT_SUFFIX}")
    }

    pub fn bundle_path(name: &str) -> String {
        format!("{name}{BUNDLE_SUFFIX}")
    }

    /// Store a sealed file. The bundle is written last, so a name only
    /// resolves once both objects exist. If the bundle write fails, the
    /// ciphertext that was there before (or none) is put back.
    pub async fn put_sealed(&self, name: &str, ciphertext: &[u8], bundle: &MetadataBundle) -> Result<()> {
        check_name(name)?;
        let bundle_bytes = bundle.to_bytes()?;
        let ct_path = Self::ciphertext_path(name);

        let previous = if self.op.exists(&ct_path).await? {
            Some(self.get_ciphertext(name).await?)
        } else {
            None
        };

        self.write_object(&ct_path, ciphertext)
            .await
            .with_context(|| format!("writing ciphertext for {name}"))?;

        if let Err(e) = self.write_object(&Self::bundle_path(name), &bundle_bytes).await {
            let restored = match &previous {
                Some(old) => self.write_object(&ct_path, old).await,
                None => self.op.delete(&ct_path).await.map_err(Into::into),
            };
            if let Err(restore_err) = restored {
                tracing::error!(name, error = %restore_err, "could not restore ciphertext after failed bundle write");
            }
            return Err(e.context(format!("writing bundle for {name}")));
        }

        tracing::info!(name, bytes = ciphertext.len(), "sealed file stored");
        Ok(())
    }

    pub async fn get_sealed(&self, name: &str) -> Result<StoredFile> {
        let bundle = self.get_bundle(name).await?;
        let ciphertext = self.get_ciphertext(name).await?;
        Ok(StoredFile { ciphertext, bundle })
    }

    pub async fn get_ciphertext(&self, name: &str) -> Result<Vec<u8>> {
        check_name(name)?;
        let data = self
            .op
            .read(&Self::ciphertext_path(name))
            .await
            .with_context(|| format!("reading ciphertext for {name}"))?;
        Ok(data.to_vec())
    }

    pub async fn get_bundle(&self, name: &str) -> Result<MetadataBundle> {
        check_name(name)?;
        let data = self
            .op
            .read(&Self::bundle_path(name))
            .await
            .with_context(|| format!("reading bundle for {name}"))?;
        MetadataBundle::from_bytes(&data.to_vec()).with_context(|| format!("parsing bundle for {name}"))
    }

    /// Read only the container header.
    pub async fn get_header(&self, name: &str) -> Result<Header> {
        check_name(name)?;
        let data = self
            .op
            .read_with(&Self::ciphertext_path(name))
            .range(0..HEADER_SIZE as u64)
            .await
            .with_context(|| format!("reading header for {name}"))?;
        Ok(Header::parse(&data.to_vec())?)
    }

    /// Read the stored slot of one block without fetching the container.
    ///
    /// Slot offsets depend on which blocks are super-blocks, hence `index`.
    pub async fn read_block(&self, name: &str, index: &Index, position: usize) -> Result<Vec<u8>> {
        let header = self.get_header(name).await?;
        let ranges = header.slot_ranges(index)?;
        let range = ranges.get(position).cloned().with_context(|| {
            format!("block {position} out of range for {name} ({} blocks)", ranges.len())
        })?;

        let data = self
            .op
            .read_with(&Self::ciphertext_path(name))
            .range(range.start as u64..range.end as u64)
            .await
            .with_context(|| format!("reading block {position} of {name}"))?;
        Ok(data.to_vec())
    }

    /// Replace the ciphertext after revocation. The bundle is unchanged.
    pub async fn replace_ciphertext(&self, name: &str, ciphertext: &[u8]) -> Result<()> {
        let current = self.get_header(name).await?;
        let replacement = Header::parse(ciphertext).context("replacement is not a knob container")?;
        if current != replacement {
            anyhow::bail!("replacement header does not match stored container for {name}");
        }

        self.write_object(&Self::ciphertext_path(name), ciphertext)
            .await
            .with_context(|| format!("replacing ciphertext for {name}"))?;
        tracing::info!(name, "ciphertext replaced");
        Ok(())
    }

    /// Replace several ciphertexts as one batch.
    ///
    /// On the first failure the already replaced names get their previous
    /// ciphertext back. The error names the file that failed and any file
    /// that could not be restored.
    pub async fn replace_all(&self, replacements: &[Replacement<'_>]) -> Result<()> {
        for (i, replacement) in replacements.iter().enumerate() {
            let Err(e) = self.replace_ciphertext(replacement.name, replacement.next).await else {
                continue;
            };

            let mut restored = Vec::new();
            let mut still_replaced = Vec::new();
            for done in replacements[..i].iter().rev() {
                match self.write_object(&Self::ciphertext_path(done.name), done.previous).await {
                    Ok(()) => restored.push(done.name),
                    Err(restore_err) => {
                        tracing::error!(name = done.name, error = %restore_err, "rollback failed");
                        still_replaced.push(done.name);
                    }
                }
            }

            if still_replaced.is_empty() {
                return Err(e.context(format!(
                    "batch aborted at {}; restored {restored:?}",
                    replacement.name
                )));
            }
            return Err(e.context(format!(
                "batch aborted at {}; restored {restored:?}; still replaced: {still_replaced:?}",
                replacement.name
            )));
        }
        Ok(())
    }

    pub async fn exists(&self, name: &str) -> Result<bool> {
        check_name(name)?;
        Ok(self.op.exists(&Self::bundle_path(name)).await?)
    }

    /// Names of all stored files, sorted.
    pub async fn list(&self) -> Result<Vec<String>> {
        let entries = self.op.list("/").await.context("listing store")?;
        let mut names: Vec<String> = entries
            .iter()
            .filter_map(|entry| entry.name().strip_suffix(BUNDLE_SUFFIX))
            .map(str::to_string)
            .collect();
        names.sort();
        Ok(names)
    }

    pub async fn remove(&self, name: &str) -> Result<()> {
        check_name(name)?;
        self.op.delete(&Self::bundle_path(name)).await?;
        self.op.delete(&Self::ciphertext_path(name)).await?;
        Ok(())
    }
}

impl SealedStore {
    /// Write one whole object, staging it first when the backend can rename.
    async fn write_object(&self, path: &str, data: &[u8]) -> Result<()> {
        if !self.op.info().full_capability().rename {
            self.op.write(path, data.to_vec()).await?;
            return Ok(());
        }

        // names never start with '.', so staging paths cannot collide
        let staging = format!(".{path}{STAGING_SUFFIX}");
        self.op.write(&staging, data.to_vec()).await?;
        if let Err(e) = self.op.rename(&staging, path).await {
            if let Err(cleanup) = self.op.delete(&staging).await {
                tracing::warn!(path = %staging, error = %cleanup, "staging object left behind");
            }
            return Err(e.into());
        }
        Ok(())
    }
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name.starts_with('.') {
        anyhow::bail!("invalid file name {name:?}: must be non-empty, without '/', not starting with '.'");
    }
    Ok(())
}
