//! Filesystem layout and toolchain settings.

use std::path::{Component, Path, PathBuf};

use crate::cache::mirror_dir;

lazy_static::lazy_static! {
    /// Shared headers, relative to the shader root. Any of them going stale invalidates every
    /// shader cache lookup.
    pub static ref SHADER_INCLUDES: Vec<PathBuf> = [
        "Common.hlsli",
        "Material.hlsli",
        "Lighting.hlsli",
        "Bindless.hlsli",
    ]
    .into_iter()
    .map(PathBuf::from)
    .collect();
}

/// Environment variable overriding [BuildConfig::compiler].
pub const COMPILER_ENV: &str = "DXC_PATH";

#[derive(Clone, Debug, PartialEq)]
/// Where sources, artifacts and cache records live, and how the compiler is called.
pub struct BuildConfig {
    /// Raw shaders, templates and shared includes.
    pub shader_root: PathBuf,
    /// Material graph files.
    pub materials_root: PathBuf,
    /// Persistent artifacts.
    pub compiled_root: PathBuf,
    /// Artifacts of interactive builds.
    pub scratch_root: PathBuf,
    /// Substituted template sources.
    pub generated_root: PathBuf,
    #[allow(missing_docs)]
    pub shader_cache_root: PathBuf,
    #[allow(missing_docs)]
    pub material_cache_root: PathBuf,
    /// Compiler executable.
    pub compiler: PathBuf,
    /// SPIR-V target environment.
    pub target_env: String,
    /// Include set, relative to [BuildConfig::shader_root].
    pub includes: Vec<PathBuf>,
    /// Include search directories.
    pub include_dirs: Vec<PathBuf>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self::rooted("")
    }
}

impl BuildConfig {
    /// Default layout rebased under `root`.
    pub fn rooted(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let shader_root = root.join("Shaders");

        Self {
            materials_root: root.join("Materials"),
            compiled_root: root.join("Compiled/Shaders"),
            scratch_root: root.join("Temp/Shaders"),
            generated_root: root.join("Temp/Generated"),
            shader_cache_root: root.join("Cache/Shaders"),
            material_cache_root: root.join("Cache/Materials"),
            compiler: PathBuf::from("dxc"),
            target_env: String::from("vulkan1.2"),
            includes: SHADER_INCLUDES.clone(),
            include_dirs: vec![shader_root.clone()],
            shader_root,
        }
    }

    /// Default layout with environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(compiler) = std::env::var_os(COMPILER_ENV) {
            config.compiler = compiler.into();
        }

        config
    }

    /// Include set resolved against the shader root.
    pub fn include_paths(&self) -> Vec<PathBuf> {
        self.includes
            .iter()
            .map(|include| self.shader_root.join(include))
            .collect()
    }

    /// Artifact of a raw shader, mirroring the source's location under the shader root.
    pub fn shader_artifact(&self, source: &Path, name: &str, macro_hash: u64) -> PathBuf {
        self.compiled_root
            .join(mirror_dir(source, &self.shader_root))
            .join(artifact_name(name, macro_hash, "spv"))
    }

    /// Artifact of a material variant. Persistent artifacts go to the compiled tree, the others
    /// to the scratch tree.
    pub fn material_artifact(
        &self,
        material: &Path,
        name: &str,
        macro_hash: u64,
        persistent: bool,
    ) -> PathBuf {
        let root = if persistent {
            &self.compiled_root
        } else {
            &self.scratch_root
        };

        root.join(logical_components(material).collect::<PathBuf>())
            .join(artifact_name(name, macro_hash, "spv"))
    }

    /// Substituted source of a material variant.
    pub fn generated_source(&self, material: &Path, name: &str, macro_hash: u64) -> PathBuf {
        let stem = logical_components(material).collect::<Vec<_>>().join("_");

        self.generated_root
            .join(artifact_name(&format!("{stem}_{name}"), macro_hash, "hlsl"))
    }
}

fn artifact_name(name: &str, macro_hash: u64, extension: &str) -> String {
    format!("{name}_{macro_hash:016x}.{extension}")
}

/// Plain components of a material's logical path, extension dropped.
fn logical_components(material: &Path) -> impl Iterator<Item = String> + '_ {
    let stem = material.file_stem();
    let count = material.components().count();

    material
        .components()
        .enumerate()
        .filter_map(move |(index, component)| match component {
            Component::Normal(_) if index + 1 == count => stem,
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .map(|part| part.to_string_lossy().into_owned())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_layout() {
        let config = BuildConfig::default();

        assert_eq!(config.shader_root, PathBuf::from("Shaders"));
        assert_eq!(config.materials_root, PathBuf::from("Materials"));
        assert_eq!(config.compiled_root, PathBuf::from("Compiled/Shaders"));
        assert_eq!(config.shader_cache_root, PathBuf::from("Cache/Shaders"));
        assert_eq!(config.include_dirs, vec![PathBuf::from("Shaders")]);
        assert_eq!(config.target_env, "vulkan1.2");
        assert_eq!(
            config.include_paths()[1],
            PathBuf::from("Shaders/Material.hlsli")
        );
    }

    #[test]
    fn rooted_layout() {
        let config = BuildConfig::rooted("/work");

        assert_eq!(config.scratch_root, PathBuf::from("/work/Temp/Shaders"));
        assert_eq!(config.materials_root, PathBuf::from("/work/Materials"));
        assert_eq!(
            config.material_cache_root,
            PathBuf::from("/work/Cache/Materials")
        );
        assert_eq!(config.include_dirs, vec![PathBuf::from("/work/Shaders")]);
    }

    #[test]
    fn artifact_paths() {
        let config = BuildConfig::default();

        assert_eq!(
            config.shader_artifact(Path::new("Shaders/Post/Bloom.hlsl"), "Bloom", 0xab),
            PathBuf::from("Compiled/Shaders/Post/Bloom_00000000000000ab.spv")
        );

        let material = Path::new("Materials/Brick.mat");
        assert_eq!(
            config.material_artifact(material, "ForwardPS", 1, true),
            PathBuf::from("Compiled/Shaders/Materials/Brick/ForwardPS_0000000000000001.spv")
        );
        assert_eq!(
            config.material_artifact(material, "ForwardPS", 1, false),
            PathBuf::from("Temp/Shaders/Materials/Brick/ForwardPS_0000000000000001.spv")
        );
        assert_eq!(
            config.generated_source(material, "ForwardPS", 1),
            PathBuf::from("Temp/Generated/Materials_Brick_ForwardPS_0000000000000001.hlsl")
        );
    }
}
