//! Entry points deciding between cached artifacts and fresh compiles.

use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};

use crate::{
    cache::{self, macro_hash, MaterialCache, MaterialRecord, ShaderCache, ShaderRecord},
    config::BuildConfig,
    material::{CompileFlag, MaterialSource},
    template::{self, MaterialShader, TemplateCompiler},
    toolchain::{self, Invocation, ProcessToolchain, Toolchain, ToolchainInvoker},
};

#[derive(Debug, thiserror::Error)]
/// Build error
pub enum Error {
    #[error("Shader source `{}` is missing", .0.display())]
    #[allow(missing_docs)]
    MissingSource(PathBuf),

    #[error("Compiler succeeded without producing `{}`", .0.display())]
    #[allow(missing_docs)]
    MissingArtifact(PathBuf),

    #[error("Error creating `{}`: {source}", .path.display())]
    #[allow(missing_docs)]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    #[allow(missing_docs)]
    Template(#[from] template::Error),

    #[error(transparent)]
    #[allow(missing_docs)]
    Toolchain(#[from] toolchain::Error),

    #[error(transparent)]
    #[allow(missing_docs)]
    Cache(#[from] cache::Error),
}

/// Owner of both caches and the compiler.
pub struct BuildOrchestrator<T = ProcessToolchain> {
    config: BuildConfig,
    shader_cache: ShaderCache,
    material_cache: MaterialCache,
    invoker: ToolchainInvoker<T>,
}

impl BuildOrchestrator<ProcessToolchain> {
    /// Orchestrator running the configured compiler, with both caches loaded from disk.
    pub fn open(config: BuildConfig) -> Result<Self, Error> {
        Self::with_toolchain(config, ProcessToolchain)
    }
}

impl<T: Toolchain> BuildOrchestrator<T> {
    /// Orchestrator running `toolchain`, with both caches loaded from disk.
    pub fn with_toolchain(config: BuildConfig, toolchain: T) -> Result<Self, Error> {
        let shader_cache = ShaderCache::open(&config.shader_cache_root, &config.shader_root)?;
        let material_cache =
            MaterialCache::open(&config.material_cache_root, &config.shader_root)?;

        info!(
            "Opened caches: {} shader record(s), {} material record(s)",
            shader_cache.len(),
            material_cache.len()
        );

        Ok(Self {
            config,
            shader_cache,
            material_cache,
            invoker: ToolchainInvoker::new(toolchain),
        })
    }

    #[allow(missing_docs)]
    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    #[allow(missing_docs)]
    pub fn shader_cache(&self) -> &ShaderCache {
        &self.shader_cache
    }

    #[allow(missing_docs)]
    pub fn material_cache(&self) -> &MaterialCache {
        &self.material_cache
    }

    #[allow(missing_docs)]
    pub fn invoker(&self) -> &ToolchainInvoker<T> {
        &self.invoker
    }

    /// Whether every shared include matches its record. A single stale or missing include is
    /// enough to invalidate every shader cache lookup.
    pub fn is_shader_include_cached(&self) -> bool {
        self.config.include_paths().into_iter().all(|path| {
            let fresh = ShaderRecord::include(&path)
                .is_some_and(|record| self.shader_cache.contains(&record));

            if !fresh {
                debug!("Include `{}` is stale", path.display());
            }
            fresh
        })
    }

    /// Record the current state of every shared include. Meant to run once a rebuild pass is
    /// over. Returns the number of records written.
    pub fn commit_include_set(&self) -> Result<usize, Error> {
        let mut written = 0;

        for path in self.config.include_paths() {
            let Some(record) = ShaderRecord::include(&path) else {
                warn!("Include `{}` is missing", path.display());
                continue;
            };

            let name = path
                .file_name()
                .map(|file| file.to_string_lossy().into_owned())
                .unwrap_or_default();
            self.shader_cache.write(&name, record)?;
            written += 1;
        }

        Ok(written)
    }

    /// Compiled artifact of `source`, or `None` if the build failed. Failures are logged.
    pub fn compile_shader(
        &self,
        name: &str,
        source: &Path,
        entry: &str,
        profile: &str,
        defines: &[&str],
    ) -> Option<PathBuf> {
        self.try_compile_shader(name, source, entry, profile, defines)
            .map_err(|err| error!("Skipping shader `{name}`: {err}"))
            .ok()
    }

    /// [BuildOrchestrator::compile_shader] with the typed error.
    pub fn try_compile_shader(
        &self,
        name: &str,
        source: &Path,
        entry: &str,
        profile: &str,
        defines: &[&str],
    ) -> Result<PathBuf, Error> {
        let hash = macro_hash(defines);
        let output = self.config.shader_artifact(source, name, hash);

        let record = ShaderRecord::probe(source, Some(output.clone()), entry, profile, defines)
            .ok_or_else(|| Error::MissingSource(source.to_owned()))?;

        if self.is_shader_include_cached() && self.shader_cache.contains(&record) && output.exists()
        {
            debug!("Cache hit for `{}`", output.display());
            return Ok(output);
        }

        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent).map_err(|source| Error::Io {
                path: parent.to_owned(),
                source,
            })?;
        }

        info!("Compiling `{name}` from `{}`", source.display());
        self.invoker.invoke(&Invocation::dxc(
            &self.config,
            source,
            &output,
            entry,
            profile,
            defines,
        ))?;

        if !output.exists() {
            return Err(Error::MissingArtifact(output));
        }

        self.shader_cache
            .write(&format!("{name}_{hash:016x}"), record)?;

        Ok(output)
    }

    /// Compiled artifact of `template` specialized for `material`, or `None` if the build failed.
    /// Failures are logged.
    pub fn compile_material_shader(
        &self,
        name: &str,
        template: &Path,
        entry: &str,
        profile: &str,
        material: &mut dyn MaterialSource,
        defines: &[&str],
    ) -> Option<PathBuf> {
        self.try_compile_material_shader(name, template, entry, profile, material, defines)
            .map_err(|err| {
                error!(
                    "Skipping shader `{name}` of `{}`: {err}",
                    material.logical_path().display()
                )
            })
            .ok()
    }

    /// [BuildOrchestrator::compile_material_shader] with the typed error.
    ///
    /// Stale includes escalate the material's flag to [CompileFlag::IncludeChanged]. Flags
    /// forcing a compile are reset to [CompileFlag::Interactive] once the compile succeeds.
    pub fn try_compile_material_shader(
        &self,
        name: &str,
        template: &Path,
        entry: &str,
        profile: &str,
        material: &mut dyn MaterialSource,
        defines: &[&str],
    ) -> Result<PathBuf, Error> {
        let shader = MaterialShader {
            name,
            template,
            entry,
            profile,
            defines,
        };

        if !material.compile_flag().forces_compile() && !self.is_shader_include_cached() {
            warn!(
                "Shared includes changed, forcing `{name}` of `{}`",
                material.logical_path().display()
            );
            material.set_compile_flag(CompileFlag::IncludeChanged);
        }

        let flag = material.compile_flag();
        if !flag.forces_compile() {
            if let Some(output) = self.cached_material_artifact(&shader, &*material) {
                debug!("Cache hit for `{}`", output.display());
                return Ok(output);
            }
        }

        let compiler = TemplateCompiler::new(
            &self.config,
            &self.invoker,
            &self.shader_cache,
            &self.material_cache,
        );
        let output = compiler.compile(&shader, &*material)?;

        if flag.forces_compile() {
            material.set_compile_flag(CompileFlag::Interactive);
        }

        Ok(output)
    }

    fn cached_material_artifact(
        &self,
        shader: &MaterialShader,
        material: &dyn MaterialSource,
    ) -> Option<PathBuf> {
        let template = ShaderRecord::template(shader.template, shader.entry, shader.profile)?;
        if !self.shader_cache.contains(&template) {
            return None;
        }

        let hash = macro_hash(shader.defines);
        let logical_path = material.logical_path();
        let candidates: &[bool] = if material.compile_flag().is_persistent() {
            &[true]
        } else {
            &[true, false]
        };

        // The most recent build wins, so a scratch rebuild after an edit shadows the older
        // persistent artifact until the next save.
        candidates
            .iter()
            .map(|&persistent| shader.artifact(&self.config, logical_path, persistent))
            .filter_map(|artifact| {
                let record = MaterialRecord::probe(shader.template, logical_path, hash, &artifact)?;
                self.material_cache
                    .contains(&record)
                    .then_some((record.output_modified, artifact))
            })
            .max_by_key(|(modified, _)| *modified)
            .map(|(_, artifact)| artifact)
    }
}
