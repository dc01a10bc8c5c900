use std::path::{Path, PathBuf};

use rgpu::shader::{ShaderError, load_shader_binary};

pub const SHADER_DIR: &str = "shaders";
pub const VERTEX_SHADER: &str = "triangle.vert.spv";
pub const FRAGMENT_SHADER: &str = "triangle.frag.spv";

/// Compiled SPIR-V for both triangle stages, loaded once at startup.
#[derive(Debug, Clone)]
pub struct ShaderBinaries {
    pub vertex: Vec<u8>,
    pub fragment: Vec<u8>,
}

impl ShaderBinaries {
    pub fn load() -> Result<Self, ShaderError> {
        let roots = search_roots();
        Ok(Self {
            vertex: load_shader_binary(resolve_shader_path(&roots, VERTEX_SHADER))?,
            fragment: load_shader_binary(resolve_shader_path(&roots, FRAGMENT_SHADER))?,
        })
    }
}

/// The executable's directory, then the working directory.
fn search_roots() -> Vec<PathBuf> {
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_owned));
    let cwd = std::env::current_dir().ok();
    exe_dir.into_iter().chain(cwd).collect()
}

/// The first `root/shaders/file_name` that exists. If none do, the path under
/// the last root so the load error names a sensible location.
fn resolve_shader_path(roots: &[PathBuf], file_name: &str) -> PathBuf {
    let candidates: Vec<PathBuf> = roots
        .iter()
        .map(|root| root.join(SHADER_DIR).join(file_name))
        .collect();
    match candidates.iter().find(|path| path.is_file()) {
        Some(path) => path.clone(),
        None => candidates
            .last()
            .cloned()
            .unwrap_or_else(|| Path::new(SHADER_DIR).join(file_name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn prefers_first_root_with_shader() {
        let exe_dir = tempfile::tempdir().unwrap();
        let cwd = tempfile::tempdir().unwrap();
        for root in [exe_dir.path(), cwd.path()] {
            fs::create_dir_all(root.join(SHADER_DIR)).unwrap();
            fs::write(root.join(SHADER_DIR).join(VERTEX_SHADER), b"").unwrap();
        }

        let roots = [exe_dir.path().to_owned(), cwd.path().to_owned()];
        assert_eq!(
            resolve_shader_path(&roots, VERTEX_SHADER),
            exe_dir.path().join(SHADER_DIR).join(VERTEX_SHADER)
        );
    }

    #[test]
    fn falls_back_to_working_directory() {
        let exe_dir = tempfile::tempdir().unwrap();
        let cwd = tempfile::tempdir().unwrap();
        fs::create_dir_all(cwd.path().join(SHADER_DIR)).unwrap();
        fs::write(cwd.path().join(SHADER_DIR).join(FRAGMENT_SHADER), b"").unwrap();

        let roots = [exe_dir.path().to_owned(), cwd.path().to_owned()];
        assert_eq!(
            resolve_shader_path(&roots, FRAGMENT_SHADER),
            cwd.path().join(SHADER_DIR).join(FRAGMENT_SHADER)
        );
    }

    #[test]
    fn missing_everywhere_points_at_last_root() {
        let exe_dir = tempfile::tempdir().unwrap();
        let cwd = tempfile::tempdir().unwrap();

        let roots = [exe_dir.path().to_owned(), cwd.path().to_owned()];
        assert_eq!(
            resolve_shader_path(&roots, VERTEX_SHADER),
            cwd.path().join(SHADER_DIR).join(VERTEX_SHADER)
        );
        assert_eq!(
            resolve_shader_path(&[], VERTEX_SHADER),
            Path::new("shaders/triangle.vert.spv")
        );
    }
}
