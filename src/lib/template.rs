//! Template substitution and compilation of material shaders.

use std::path::{Path, PathBuf};

use log::info;

use crate::{
    cache::{self, macro_hash, MaterialCache, MaterialRecord, ShaderCache, ShaderRecord},
    config::BuildConfig,
    material::MaterialSource,
    shader::{channel::MaterialChannel, eval::Evaluation},
    toolchain::{self, Invocation, Toolchain, ToolchainInvoker},
};

/// Marker replaced by the material constant buffer fields.
pub const CBUFFER_MARKER: &str = "//%MATERIAL_CBUFFER";
/// Marker replaced by the sampled texture declarations.
pub const TEXTURES_MARKER: &str = "//%MATERIAL_TEXTURES";

#[derive(Clone, Debug, Default, PartialEq)]
/// Ordered list of `(marker, code)` substitutions for a template.
pub struct GeneratedSource {
    substitutions: Vec<(String, String)>,
}

impl GeneratedSource {
    #[allow(missing_docs)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a substitution. Substitutions apply in insertion order.
    pub fn with(mut self, marker: impl Into<String>, code: impl Into<String>) -> Self {
        self.substitutions.push((marker.into(), code.into()));
        self
    }

    /// Substitutions for a material evaluation: channel markers from the highest index down, so
    /// `//%INPUT1` can never eat into `//%INPUT1x`, then the constant buffer and texture markers.
    pub fn from_evaluation(evaluation: &Evaluation) -> Self {
        let mut source = Self::new();

        for &channel in MaterialChannel::ALL.iter().rev() {
            if let Some(code) = evaluation.channel(channel) {
                source = source.with(channel.marker(), code);
            }
        }

        source
            .with(CBUFFER_MARKER, evaluation.cbuffer.declarations())
            .with(TEXTURES_MARKER, evaluation.texture_declarations())
    }

    #[allow(missing_docs)]
    pub fn substitutions(&self) -> &[(String, String)] {
        &self.substitutions
    }

    /// Replace every marker occurrence in `template`.
    pub fn apply(&self, template: &str) -> String {
        self.substitutions
            .iter()
            .fold(template.to_owned(), |text, (marker, code)| {
                text.replace(marker.as_str(), code)
            })
    }
}

#[derive(Debug, thiserror::Error)]
/// [TemplateCompiler] error
pub enum Error {
    #[error("Error reading template `{}`: {source}", .path.display())]
    #[allow(missing_docs)]
    Template {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Template `{}` is empty", .0.display())]
    #[allow(missing_docs)]
    EmptyTemplate(PathBuf),

    #[error("Error writing `{}`: {source}", .path.display())]
    #[allow(missing_docs)]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Compiler succeeded without producing `{}`", .0.display())]
    #[allow(missing_docs)]
    MissingArtifact(PathBuf),

    #[error(transparent)]
    #[allow(missing_docs)]
    Toolchain(#[from] toolchain::Error),

    #[error(transparent)]
    #[allow(missing_docs)]
    Cache(#[from] cache::Error),
}

#[derive(Clone, Copy, Debug)]
/// One material shader variant to build.
pub struct MaterialShader<'r> {
    /// Logical shader name, used in artifact names.
    pub name: &'r str,
    #[allow(missing_docs)]
    pub template: &'r Path,
    #[allow(missing_docs)]
    pub entry: &'r str,
    #[allow(missing_docs)]
    pub profile: &'r str,
    /// Macros in command line order.
    pub defines: &'r [&'r str],
}

impl MaterialShader<'_> {
    /// Name shared by the variant's generated source, artifact and record. Entry point and
    /// profile are part of it since the same template can be compiled for several of them.
    pub fn variant_name(&self) -> String {
        format!("{}_{}_{}", self.name, self.entry, self.profile)
    }

    /// Artifact of this variant for `material`, in the tree selected by `persistent`.
    pub fn artifact(&self, config: &BuildConfig, material: &Path, persistent: bool) -> PathBuf {
        config.material_artifact(
            material,
            &self.variant_name(),
            macro_hash(self.defines),
            persistent,
        )
    }

    /// Substituted source of this variant for `material`.
    pub fn generated_source(&self, config: &BuildConfig, material: &Path) -> PathBuf {
        config.generated_source(material, &self.variant_name(), macro_hash(self.defines))
    }

    /// Name of the template's [ShaderCache] record.
    pub fn template_record_name(&self) -> String {
        let file = self
            .template
            .file_name()
            .map(|file| file.to_string_lossy().into_owned())
            .unwrap_or_default();

        format!("{file}.{}.{}", self.entry, self.profile)
    }

    /// Name of the variant's [MaterialCache] record.
    pub fn variant_record_name(&self, persistent: bool) -> String {
        let name = format!("{}_{:016x}", self.variant_name(), macro_hash(self.defines));

        if persistent {
            name
        } else {
            name + "_scratch"
        }
    }
}

/// Generates, writes and compiles the concrete source of material shader variants.
pub struct TemplateCompiler<'a, T> {
    config: &'a BuildConfig,
    invoker: &'a ToolchainInvoker<T>,
    shader_cache: &'a ShaderCache,
    material_cache: &'a MaterialCache,
}

impl<'a, T: Toolchain> TemplateCompiler<'a, T> {
    #[allow(missing_docs)]
    pub fn new(
        config: &'a BuildConfig,
        invoker: &'a ToolchainInvoker<T>,
        shader_cache: &'a ShaderCache,
        material_cache: &'a MaterialCache,
    ) -> Self {
        Self {
            config,
            invoker,
            shader_cache,
            material_cache,
        }
    }

    /// Build `shader` for `material` and record it in both caches. Returns the artifact path.
    pub fn compile(
        &self,
        shader: &MaterialShader,
        material: &dyn MaterialSource,
    ) -> Result<PathBuf, Error> {
        let template = std::fs::read_to_string(shader.template).map_err(|source| {
            Error::Template {
                path: shader.template.to_owned(),
                source,
            }
        })?;
        if template.trim().is_empty() {
            return Err(Error::EmptyTemplate(shader.template.to_owned()));
        }

        let code = material.generate().apply(&template);

        let hash = macro_hash(shader.defines);
        let logical_path = material.logical_path();
        let generated = shader.generated_source(self.config, logical_path);
        write(&generated, code.as_bytes())?;

        let persistent = material.compile_flag().is_persistent();
        let output = shader.artifact(self.config, logical_path, persistent);
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent).map_err(|source| Error::Write {
                path: parent.to_owned(),
                source,
            })?;
        }

        info!(
            "Compiling `{}` of `{}` from `{}`",
            shader.name,
            logical_path.display(),
            shader.template.display()
        );
        self.invoker.invoke(&Invocation::dxc(
            self.config,
            &generated,
            &output,
            shader.entry,
            shader.profile,
            shader.defines,
        ))?;

        let variant = MaterialRecord::probe(shader.template, logical_path, hash, &output)
            .ok_or_else(|| Error::MissingArtifact(output.clone()))?;
        if let Some(record) = ShaderRecord::template(shader.template, shader.entry, shader.profile)
        {
            self.shader_cache
                .write(&shader.template_record_name(), record)?;
        }
        self.material_cache
            .write(&shader.variant_record_name(persistent), variant)?;

        Ok(output)
    }
}

fn write(path: &Path, contents: &[u8]) -> Result<(), Error> {
    let error = |source| Error::Write {
        path: path.to_owned(),
        source,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(error)?;
    }
    std::fs::write(path, contents).map_err(error)
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::{
        material::{CompileFlag, Material, MaterialInput},
        shader::value::ParamValue,
        testing::{scratch_dir, FixedSource, RecordingToolchain},
    };

    use map_macro::hash_map;

    const TEMPLATE: &str = "\
cbuffer MaterialConstants : register(b0)
{
//%MATERIAL_CBUFFER
};
//%MATERIAL_TEXTURES
float4 main(PSInput input) : SV_Target
{
//%INPUT0
//%INPUT1
    return float4(diffuse, opacity);
}
";

    #[test]
    fn substitution_order() {
        let source = GeneratedSource::new()
            .with("//%INPUT1", "a")
            .with("//%INPUT0", "b");

        assert_eq!(source.apply("//%INPUT0 //%INPUT1 //%INPUT0"), "b a b");
        assert_eq!(source.apply("no markers"), "no markers");
    }

    #[test]
    fn evaluation_markers() {
        let material = Material::from_inputs(
            "Materials/Brick.mat",
            &hash_map! {
                MaterialChannel::Diffuse => MaterialInput::Texture("BrickAlbedo".into()),
                MaterialChannel::Opacity => ParamValue::float(0.5).into(),
            },
        )
        .unwrap();

        let source = material.generate();
        let markers: Vec<&str> = source
            .substitutions()
            .iter()
            .map(|(marker, _)| marker.as_str())
            .collect();
        assert_eq!(markers.first(), Some(&"//%INPUT6"));
        assert_eq!(markers[6], "//%INPUT0");
        assert_eq!(&markers[7..], &[CBUFFER_MARKER, TEXTURES_MARKER]);

        let code = source.apply(TEMPLATE);
        assert!(!code.contains("//%"), "{code}");
        assert!(code.contains("float param0;\n"), "{code}");
        assert!(code.contains("Texture2D BrickAlbedo;\n"), "{code}");
        assert!(code.contains("float3 diffuse = n1.rgb;\n"), "{code}");
        assert!(code.contains("float opacity = n2;\n"), "{code}");
    }

    fn fixture(name: &str) -> (PathBuf, BuildConfig, PathBuf) {
        let dir = scratch_dir(name);
        let config = BuildConfig::rooted(&dir);
        let template = config.shader_root.join("Templates/Material.hlsl");

        std::fs::create_dir_all(template.parent().unwrap()).unwrap();
        std::fs::write(&template, TEMPLATE).unwrap();

        (dir, config, template)
    }

    #[test]
    fn compile_writes_source_and_records() {
        let (_dir, config, template) = fixture("template-compile");
        let invoker = ToolchainInvoker::new(RecordingToolchain::default());
        let shaders = ShaderCache::new(&config.shader_cache_root, &config.shader_root);
        let materials = MaterialCache::new(&config.material_cache_root, &config.shader_root);
        let compiler = TemplateCompiler::new(&config, &invoker, &shaders, &materials);

        let material = FixedSource::new(
            "Materials/Red.mat",
            GeneratedSource::new().with("//%INPUT0", "float3 diffuse = float3(1, 0, 0);"),
        );
        let shader = MaterialShader {
            name: "ForwardPS",
            template: &template,
            entry: "main",
            profile: "ps_6_6",
            defines: &["WITH_ALPHATEST"],
        };

        let output = compiler.compile(&shader, &material).unwrap();
        assert_eq!(output, shader.artifact(&config, &material.path, false));
        assert!(output.starts_with(&config.scratch_root));
        assert!(output.exists());

        let generated = shader.generated_source(&config, &material.path);
        assert!(generated.ends_with(format!(
            "Materials_Red_ForwardPS_main_ps_6_6_{:016x}.hlsl",
            macro_hash(shader.defines)
        )));
        let code = std::fs::read_to_string(&generated).unwrap();
        assert!(code.contains("float3 diffuse = float3(1, 0, 0);"));

        let invocations = invoker.toolchain().invocations.borrow();
        assert!(invocations[0].ends_with("-D WITH_ALPHATEST"));
        assert!(invocations[0].contains(&format!("\"{}\"", generated.display())));

        assert!(shaders.contains(&ShaderRecord::template(&template, "main", "ps_6_6").unwrap()));
        assert!(materials.contains(
            &MaterialRecord::probe(
                &template,
                "Materials/Red.mat",
                macro_hash(shader.defines),
                &output
            )
            .unwrap()
        ));
    }

    #[test]
    fn persistent_flags_use_compiled_tree() {
        let (_dir, config, template) = fixture("template-persistent");
        let invoker = ToolchainInvoker::new(RecordingToolchain::default());
        let shaders = ShaderCache::new(&config.shader_cache_root, &config.shader_root);
        let materials = MaterialCache::new(&config.material_cache_root, &config.shader_root);
        let compiler = TemplateCompiler::new(&config, &invoker, &shaders, &materials);

        let mut material = FixedSource::new("Materials/Red.mat", GeneratedSource::new());
        material.flag = CompileFlag::Resave;
        let shader = MaterialShader {
            name: "ForwardPS",
            template: &template,
            entry: "main",
            profile: "ps_6_6",
            defines: &[],
        };

        let output = compiler.compile(&shader, &material).unwrap();
        assert!(output.starts_with(&config.compiled_root));
    }

    #[test]
    fn failures_write_nothing() {
        let (_dir, config, template) = fixture("template-failure");
        let invoker =
            ToolchainInvoker::new(RecordingToolchain::failing("error: undeclared identifier"));
        let shaders = ShaderCache::new(&config.shader_cache_root, &config.shader_root);
        let materials = MaterialCache::new(&config.material_cache_root, &config.shader_root);
        let compiler = TemplateCompiler::new(&config, &invoker, &shaders, &materials);

        let material = FixedSource::new("Materials/Red.mat", GeneratedSource::new());
        let mut shader = MaterialShader {
            name: "ForwardPS",
            template: &template,
            entry: "main",
            profile: "ps_6_6",
            defines: &[],
        };

        assert!(matches!(
            compiler.compile(&shader, &material),
            Err(Error::Toolchain(toolchain::Error::Diagnostics { .. }))
        ));
        assert!(shaders.is_empty() && materials.is_empty());

        let empty = template.with_file_name("Empty.hlsl");
        std::fs::write(&empty, "  \n").unwrap();
        shader.template = &empty;
        assert!(matches!(
            compiler.compile(&shader, &material),
            Err(Error::EmptyTemplate(_))
        ));

        let missing = template.with_file_name("Missing.hlsl");
        shader.template = &missing;
        assert!(matches!(
            compiler.compile(&shader, &material),
            Err(Error::Template { .. })
        ));

        // Only the first request reached the compiler.
        assert_eq!(invoker.toolchain().spawns.get(), 1);
    }
}
