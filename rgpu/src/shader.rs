use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use crate::device::Device;

const SPIRV_MAGIC: u32 = 0x0723_0203;

#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("Failed to load shader binary {path}: {source}")]
    LoadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("SPIR-V byte length ({0}) is not a non-zero multiple of 4")]
    InvalidLength(usize),

    #[error("SPIR-V magic number mismatch, found {0:#010x}")]
    BadMagic(u32),

    #[error("Vulkan error creating shader module: {0}")]
    Vulkan(vk::Result),
}

/// Read a compiled SPIR-V binary from disk and check that it looks like one.
pub fn load_shader_binary(path: impl AsRef<Path>) -> Result<Vec<u8>, ShaderError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|source| ShaderError::LoadFailed {
        path: path.to_owned(),
        source,
    })?;
    spirv_words(&bytes)?;
    tracing::debug!("Loaded shader binary {} ({} bytes)", path.display(), bytes.len());
    Ok(bytes)
}

/// Reinterpret little-endian SPIR-V bytes as words, validating length and
/// magic number.
pub fn spirv_words(bytes: &[u8]) -> Result<Vec<u32>, ShaderError> {
    if bytes.is_empty() || !bytes.len().is_multiple_of(4) {
        return Err(ShaderError::InvalidLength(bytes.len()));
    }
    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        Some(&other) => Err(ShaderError::BadMagic(other)),
        None => Err(ShaderError::InvalidLength(0)),
    }
}

/// The pipeline stage an entry point is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl From<ShaderStage> for vk::ShaderStageFlags {
    fn from(stage: ShaderStage) -> Self {
        match stage {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    }
}

pub struct ShaderModule {
    parent: Arc<Device>,
    handle: vk::ShaderModule,
}

impl std::fmt::Debug for ShaderModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderModule")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl ShaderModule {
    /// Create a shader module from raw SPIR-V bytes.
    pub fn new(device: &Arc<Device>, spirv_bytes: &[u8]) -> Result<Self, ShaderError> {
        let code = spirv_words(spirv_bytes)?;
        let create_info = vk::ShaderModuleCreateInfo::default().code(&code);

        // SAFETY: code holds validated SPIR-V words and outlives the call.
        let handle = unsafe { device.create_raw_shader_module(&create_info) }
            .map_err(ShaderError::Vulkan)?;

        Ok(Self {
            parent: Arc::clone(device),
            handle,
        })
    }

    /// Returns `Err` only if `name` contains an interior NUL byte.
    pub fn entry_point(
        &self,
        name: &str,
        stage: ShaderStage,
    ) -> Result<EntryPoint<'_>, std::ffi::NulError> {
        Ok(EntryPoint {
            module: self,
            name: CString::new(name)?,
            stage,
        })
    }

    pub fn raw_handle(&self) -> vk::ShaderModule {
        self.handle
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        tracing::debug!("Dropping shader module {:?}", self.handle);
        // SAFETY: handle was created from parent. Pipelines built from it keep
        // their own copy of the code, so it can go once creation is done.
        unsafe { self.parent.destroy_raw_shader_module(self.handle) };
    }
}

/// A [`ShaderModule`] paired with an entry point name and stage.
#[derive(Debug)]
pub struct EntryPoint<'a> {
    module: &'a ShaderModule,
    name: CString,
    stage: ShaderStage,
}

impl EntryPoint<'_> {
    /// The returned struct borrows from `self` and must not outlive it.
    pub fn as_pipeline_stage_create_info(&self) -> vk::PipelineShaderStageCreateInfo<'_> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(self.stage.into())
            .module(self.module.raw_handle())
            .name(&self.name)
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn spirv_header() -> Vec<u8> {
        let mut bytes = Vec::new();
        for word in [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0] {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn spirv_words_accepts_valid_header() {
        let words = spirv_words(&spirv_header()).expect("header should validate");
        assert_eq!(words.len(), 5);
        assert_eq!(words[0], SPIRV_MAGIC);
    }

    #[test]
    fn spirv_words_rejects_partial_word() {
        let mut bytes = spirv_header();
        bytes.push(0);
        assert!(matches!(spirv_words(&bytes), Err(ShaderError::InvalidLength(21))));
    }

    #[test]
    fn spirv_words_rejects_empty_input() {
        assert!(matches!(spirv_words(&[]), Err(ShaderError::InvalidLength(0))));
    }

    #[test]
    fn spirv_words_rejects_wrong_magic() {
        let bytes = [0xde, 0xad, 0xbe, 0xef];
        assert!(matches!(spirv_words(&bytes), Err(ShaderError::BadMagic(0xefbe_adde))));
    }

    #[test]
    fn load_shader_binary_reads_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(&spirv_header()).expect("write header");

        let bytes = load_shader_binary(file.path()).expect("load should succeed");
        assert_eq!(bytes, spirv_header());
    }

    #[test]
    fn load_shader_binary_reports_missing_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let missing = dir.path().join("vertex.spv");

        match load_shader_binary(&missing) {
            Err(ShaderError::LoadFailed { path, source }) => {
                assert_eq!(path, missing);
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("expected LoadFailed, got {other:?}"),
        }
    }

    #[test]
    fn load_shader_binary_rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(b"not spirv").expect("write");

        assert!(matches!(
            load_shader_binary(file.path()),
            Err(ShaderError::InvalidLength(9))
        ));
    }

    #[test]
    fn stages_map_to_vulkan_flags() {
        assert_eq!(
            vk::ShaderStageFlags::from(ShaderStage::Vertex),
            vk::ShaderStageFlags::VERTEX
        );
        assert_eq!(
            vk::ShaderStageFlags::from(ShaderStage::Fragment),
            vk::ShaderStageFlags::FRAGMENT
        );
    }
}
