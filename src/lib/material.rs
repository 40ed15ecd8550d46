//! Material definition: a logical path, its node graph and how the next build should treat it.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use log::debug;

use crate::{
    shader::{
        channel::MaterialChannel,
        eval::{evaluate, Evaluation},
        graph::{self, NodeGraph, NodeKind},
        parsing::{self, parse_graph},
        value::{ParamValue, ValueType},
    },
    template::GeneratedSource,
    Validated,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
/// How the next build of a material should treat cached artifacts.
pub enum CompileFlag {
    /// Interactive edit; artifacts go to the scratch tree and any cached one is reused.
    #[default]
    Interactive,
    /// Saving the material; artifacts go to the persistent tree.
    Resave,
    /// Recompile into the scratch tree whatever the caches say. Set by interactive graph edits,
    /// so the last persistent artifact is left alone.
    ForceTemporary,
    /// Recompile into the persistent tree whatever the caches say.
    ForceFull,
    /// A shared include changed since the cached artifact was built. Behaves like
    /// [CompileFlag::ForceFull].
    IncludeChanged,
}

impl CompileFlag {
    /// Whether artifacts built under this flag belong to the persistent compiled tree.
    pub fn is_persistent(self) -> bool {
        !matches!(self, Self::Interactive | Self::ForceTemporary)
    }

    /// Whether cache lookups are skipped.
    pub fn forces_compile(self) -> bool {
        matches!(
            self,
            Self::ForceTemporary | Self::ForceFull | Self::IncludeChanged
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
/// Authored value of one material channel.
pub enum MaterialInput {
    /// Constant, stored in the material constant buffer.
    Value(ParamValue),
    /// Named texture sampled at the mesh texture coordinates.
    Texture(String),
}

impl From<ParamValue> for MaterialInput {
    fn from(value: ParamValue) -> Self {
        Self::Value(value)
    }
}

impl From<&str> for MaterialInput {
    fn from(texture: &str) -> Self {
        Self::Texture(texture.to_owned())
    }
}

/// Anything able to provide generated source for a template compile.
pub trait MaterialSource {
    /// Logical path of the material, used to name generated sources and artifacts.
    fn logical_path(&self) -> &Path;

    /// Code to splice into the template.
    fn generate(&self) -> GeneratedSource;

    #[allow(missing_docs)]
    fn compile_flag(&self) -> CompileFlag;

    #[allow(missing_docs)]
    fn set_compile_flag(&mut self, flag: CompileFlag);
}

#[derive(Debug, thiserror::Error)]
/// [Material] loading and authoring error
pub enum Error {
    #[error("Error reading material `{}`: {source}", .path.display())]
    #[allow(missing_docs)]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Error parsing material `{}`: {source}", .path.display())]
    #[allow(missing_docs)]
    Parse {
        path: PathBuf,
        source: parsing::Error,
    },

    #[error(transparent)]
    #[allow(missing_docs)]
    Graph(#[from] graph::Error),
}

#[derive(Clone, Debug)]
/// A material ready to be built.
pub struct Material {
    path: PathBuf,
    graph: NodeGraph<Validated>,
    flag: CompileFlag,
}

impl Material {
    #[allow(missing_docs)]
    pub fn new(path: impl Into<PathBuf>, graph: NodeGraph<Validated>) -> Self {
        Self {
            path: path.into(),
            graph,
            flag: CompileFlag::default(),
        }
    }

    /// Material whose graph wires each channel to its authored input, or to the channel default
    /// when nothing is authored. Equal constants share a single parameter node.
    pub fn from_inputs(
        path: impl Into<PathBuf>,
        inputs: &HashMap<MaterialChannel, MaterialInput>,
    ) -> Result<Self, Error> {
        let mut graph = NodeGraph::new();
        let root = graph.root();

        for &channel in MaterialChannel::ALL {
            let input = inputs
                .get(&channel)
                .cloned()
                .unwrap_or_else(|| MaterialInput::Value(channel.default_value()));

            let output = match input {
                MaterialInput::Value(value) => graph.add_parameter(value).pin("value"),
                MaterialInput::Texture(texture) => {
                    let sample = graph.add_node(NodeKind::TextureSample { texture });
                    let pin = match (channel, channel.ty()) {
                        (MaterialChannel::Opacity, _) => "a",
                        (_, ValueType::Float) => "r",
                        (_, ValueType::Float3) => "rgb",
                        _ => "rgba",
                    };
                    sample.pin(pin)
                }
            };

            graph.connect(&root.pin(channel.name()), &output)?;
        }

        Ok(Self::new(path, graph.validate()?))
    }

    /// Reads a material graph file. The file path doubles as the logical path.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();

        let text = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_owned(),
            source,
        })?;
        let graph = parse_graph(&text).map_err(|source| Error::Parse {
            path: path.to_owned(),
            source,
        })?;

        debug!(
            "Loaded material `{}` ({} nodes)",
            path.display(),
            graph.nodes().len()
        );

        Ok(Self::new(path, graph))
    }

    #[allow(missing_docs)]
    pub fn graph(&self) -> &NodeGraph<Validated> {
        &self.graph
    }

    /// Replace the graph. Graph contents are not part of any cache key, so the next build is
    /// forced. It goes to the scratch tree unless a persistent forced build is already pending.
    pub fn set_graph(&mut self, graph: NodeGraph<Validated>) {
        self.graph = graph;
        if !matches!(self.flag, CompileFlag::ForceFull | CompileFlag::IncludeChanged) {
            self.flag = CompileFlag::ForceTemporary;
        }
    }

    /// Evaluate the graph into per-channel source.
    pub fn evaluate(&self) -> Evaluation {
        evaluate(&self.graph)
    }
}

impl MaterialSource for Material {
    fn logical_path(&self) -> &Path {
        &self.path
    }

    fn generate(&self) -> GeneratedSource {
        GeneratedSource::from_evaluation(&self.evaluate())
    }

    fn compile_flag(&self) -> CompileFlag {
        self.flag
    }

    fn set_compile_flag(&mut self, flag: CompileFlag) {
        self.flag = flag;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use map_macro::hash_map;

    #[test]
    fn default_graph_shares_parameters() {
        let material = Material::from_inputs("Materials/Default.mat", &HashMap::new()).unwrap();
        let graph = material.graph();

        // Opacity and ambient occlusion both default to 1.0.
        let parameters = graph
            .nodes()
            .iter()
            .filter(|node| node.kind().is_parameter())
            .count();
        assert_eq!(parameters, MaterialChannel::ALL.len() - 1);

        let source = material.evaluate().source();
        let opacity = source
            .lines()
            .find(|line| line.starts_with("float opacity"))
            .unwrap()
            .to_owned();
        let occlusion = source
            .lines()
            .find(|line| line.starts_with("float ambient_occlusion"))
            .unwrap();

        assert_eq!(opacity.split('=').nth(1), occlusion.split('=').nth(1));
        assert_eq!(source.matches(" n2 = ").count(), 1);
    }

    #[test]
    fn textured_inputs() {
        let material = Material::from_inputs(
            "Materials/Brick.mat",
            &hash_map! {
                MaterialChannel::Diffuse => "BrickAlbedo".into(),
                MaterialChannel::Opacity => "BrickAlbedo".into(),
                MaterialChannel::Roughness => ParamValue::float(0.8).into(),
            },
        )
        .unwrap();

        let evaluation = material.evaluate();
        assert_eq!(evaluation.textures, vec!["BrickAlbedo".to_string()]);
        assert!(evaluation
            .channel(MaterialChannel::Diffuse)
            .unwrap()
            .ends_with("float3 diffuse = n1.rgb;\n"));
        assert!(evaluation
            .channel(MaterialChannel::Opacity)
            .unwrap()
            .ends_with("float opacity = n2.a;\n"));
    }

    #[test]
    fn mismatched_inputs_are_rejected() {
        let result = Material::from_inputs(
            "Materials/Bad.mat",
            &hash_map! {
                MaterialChannel::Roughness => ParamValue::float3(1., 0., 0.).into(),
            },
        );

        assert!(matches!(
            result,
            Err(Error::Graph(graph::Error::MismatchedTypes { .. }))
        ));
    }

    #[test]
    fn load_and_flags() {
        let dir = crate::testing::scratch_dir("material");
        let path = dir.join("Red.mat");
        std::fs::write(
            &path,
            "node red = vector(1.0, 0.0, 0.0)\nred.value -> material.diffuse\n",
        )
        .unwrap();

        let mut material = Material::load(&path).unwrap();
        assert_eq!(material.logical_path(), path);
        assert_eq!(material.compile_flag(), CompileFlag::Interactive);

        let graph = material.graph().clone();
        material.set_graph(graph.clone());
        assert_eq!(material.compile_flag(), CompileFlag::ForceTemporary);
        assert!(material.compile_flag().forces_compile());
        assert!(!material.compile_flag().is_persistent());
        assert!(CompileFlag::Resave.is_persistent());
        assert!(!CompileFlag::Resave.forces_compile());

        // Edits made while saving still go to the scratch tree.
        material.set_compile_flag(CompileFlag::Resave);
        material.set_graph(graph.clone());
        assert_eq!(material.compile_flag(), CompileFlag::ForceTemporary);

        // A pending persistent rebuild is kept.
        material.set_compile_flag(CompileFlag::IncludeChanged);
        material.set_graph(graph);
        assert_eq!(material.compile_flag(), CompileFlag::IncludeChanged);

        assert!(matches!(
            Material::load(dir.join("Missing.mat")),
            Err(Error::Io { .. })
        ));
    }
}
