//! Evaluation of a validated [NodeGraph] into shading-language source.
//!
//! Evaluation walks the graph depth-first from the material root, one channel at a time in
//! [MaterialChannel] order. Every node reached emits its local variable declaration exactly once;
//! later consumers reference that variable by name. Parameters are read from a packed constant
//! buffer whose layout is built along the way.

use super::{
    channel::MaterialChannel,
    graph::{InputPin, Node, NodeGraph, NodeId, NodeKind, Source},
    value::{float_literal, ValueType},
};

use crate::Validated;

use std::collections::HashSet;

use log::warn;

/// Expression used by texture samples whose `uv` input is unconnected, and by texture coordinate
/// nodes.
pub const DEFAULT_UV: &str = "input.uv";
/// Sampler shared by every texture sample of a material.
pub const MATERIAL_SAMPLER: &str = "MaterialSampler";

const SLOT_SIZE: u32 = std::mem::size_of::<f32>() as u32;

#[derive(Clone, Debug, PartialEq)]
/// One scalar slot of the material constant buffer.
pub struct ConstantBufferField {
    /// Field name in the generated declaration list.
    pub name: String,
    /// Byte offset from the start of the buffer.
    pub offset: u32,
    /// Authored value, used as initial buffer content.
    pub value: f32,
}

#[derive(Clone, Debug, Default, PartialEq)]
/// Packed per-material constant buffer.
pub struct ConstantBufferLayout {
    fields: Vec<ConstantBufferField>,
    size: u32,
}

impl ConstantBufferLayout {
    /// Fields in offset order.
    pub fn fields(&self) -> &[ConstantBufferField] {
        &self.fields
    }

    /// Packed size in bytes.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Size rounded up to the 16 byte granularity of GPU constant buffers.
    pub fn gpu_size(&self) -> u32 {
        self.size.div_ceil(16) * 16
    }

    /// Field declarations substituted into the template's constant buffer block.
    pub fn declarations(&self) -> String {
        self.fields
            .iter()
            .map(|field| format!("float {};\n", field.name))
            .collect()
    }

    /// Initial buffer content, padded to [gpu_size](Self::gpu_size).
    pub fn initial_data(&self) -> Vec<u8> {
        let values: Vec<f32> = self.fields.iter().map(|field| field.value).collect();

        let mut bytes = bytemuck::cast_slice::<f32, u8>(&values).to_vec();
        bytes.resize(self.gpu_size() as usize, 0);
        bytes
    }

    fn allocate(&mut self, value: f32) -> String {
        let offset = self.size;
        let name = format!("param{}", offset / SLOT_SIZE);

        self.fields.push(ConstantBufferField {
            name: name.clone(),
            offset,
            value,
        });
        self.size += SLOT_SIZE;

        name
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
/// Result of evaluating a material graph.
pub struct Evaluation {
    /// Per channel source, in channel order: declarations first needed by the channel followed
    /// by the channel's own variable.
    pub channels: Vec<(MaterialChannel, String)>,
    /// Constant buffer fields read by the source.
    pub cbuffer: ConstantBufferLayout,
    /// Sampled textures in first-use order.
    pub textures: Vec<String>,
}

impl Evaluation {
    /// Generated source of a single channel.
    pub fn channel(&self, channel: MaterialChannel) -> Option<&str> {
        self.channels
            .iter()
            .find(|(candidate, _)| *candidate == channel)
            .map(|(_, source)| source.as_str())
    }

    /// Every channel's source concatenated in channel order.
    pub fn source(&self) -> String {
        self.channels
            .iter()
            .map(|(_, source)| source.as_str())
            .collect()
    }

    /// `Texture2D` declarations for the sampled textures.
    pub fn texture_declarations(&self) -> String {
        self.textures
            .iter()
            .map(|texture| format!("Texture2D {texture};\n"))
            .collect()
    }
}

/// Evaluate `graph` from its material root.
pub fn evaluate(graph: &NodeGraph<Validated>) -> Evaluation {
    GraphEvaluator::new(graph).run()
}

/// Single evaluation pass over one graph.
pub struct GraphEvaluator<'g> {
    graph: &'g NodeGraph<Validated>,
    defined: HashSet<NodeId>,
    pending: String,
    cbuffer: ConstantBufferLayout,
    textures: Vec<String>,
}

impl<'g> GraphEvaluator<'g> {
    #[allow(missing_docs)]
    pub fn new(graph: &'g NodeGraph<Validated>) -> Self {
        Self {
            graph,
            defined: HashSet::new(),
            pending: String::new(),
            cbuffer: ConstantBufferLayout::default(),
            textures: Vec::new(),
        }
    }

    /// Evaluate every channel of the material root.
    pub fn run(mut self) -> Evaluation {
        let graph = self.graph;
        let root = graph.node(graph.root().node);

        let channels = MaterialChannel::ALL
            .iter()
            .map(|&channel| {
                let expression = root
                    .and_then(|root| root.inputs().get(channel.index()))
                    .and_then(|pin| self.eval_input(pin))
                    .filter(|expression| !expression.is_empty())
                    .unwrap_or_else(|| channel.default_value().literal());

                let source = format!(
                    "{}{} {} = {};\n",
                    std::mem::take(&mut self.pending),
                    channel.ty().hlsl(),
                    channel.name(),
                    expression
                );

                (channel, source)
            })
            .collect();

        Evaluation {
            channels,
            cbuffer: self.cbuffer,
            textures: self.textures,
        }
    }

    /// Expression for a connected input, `None` if the pin has no source.
    fn eval_input(&mut self, pin: &InputPin) -> Option<String> {
        pin.source().map(|source| self.eval_hlsl(source))
    }

    /// Expression reading the output pin `source`. Empty if it points outside the graph.
    fn eval_hlsl(&mut self, source: Source) -> String {
        let graph = self.graph;

        if source.graph != graph.id() {
            warn!(
                "Ignoring reference to {} from {}, evaluating it as empty",
                source.graph,
                graph.id()
            );
            return String::new();
        }

        let Some(node) = graph.node(source.node) else {
            warn!("Ignoring reference to missing node {}", source.node);
            return String::new();
        };

        let Some(output) = node.outputs().get(source.output) else {
            warn!("Ignoring reference to missing output {} of {}", source.output, node.id());
            return String::new();
        };

        match node.kind() {
            NodeKind::TexCoord => DEFAULT_UV.to_owned(),
            NodeKind::Material => String::new(),
            _ => {
                self.eval_definition(node);
                format!("{}{}", node.id(), output.swizzle())
            }
        }
    }

    /// Emit the node's declaration unless this pass already did.
    fn eval_definition(&mut self, node: &Node) {
        if !self.defined.insert(node.id()) {
            return;
        }

        let (ty, expression) = match node.kind() {
            NodeKind::Scalar(value) => (ValueType::Float, self.cbuffer.allocate(*value)),
            NodeKind::Vector(value) => {
                let slots: Vec<String> = value
                    .components()
                    .iter()
                    .map(|component| self.cbuffer.allocate(*component))
                    .collect();

                let components: Vec<String> = node
                    .inputs()
                    .iter()
                    .zip(slots)
                    .map(|(pin, slot)| {
                        self.eval_input(pin)
                            .filter(|expression| !expression.is_empty())
                            .unwrap_or(slot)
                    })
                    .collect();

                (
                    value.ty(),
                    format!("{}({})", value.ty().hlsl(), components.join(", ")),
                )
            }
            NodeKind::TextureSample { texture } => {
                let uv = node
                    .inputs()
                    .first()
                    .and_then(|pin| self.eval_input(pin))
                    .filter(|expression| !expression.is_empty())
                    .unwrap_or_else(|| DEFAULT_UV.to_owned());

                if !self.textures.contains(texture) {
                    self.textures.push(texture.clone());
                }

                (
                    ValueType::Float4,
                    format!("{texture}.Sample({MATERIAL_SAMPLER}, {uv})"),
                )
            }
            NodeKind::Arithmetic { op, ty } => {
                let operands: Vec<String> = node
                    .inputs()
                    .iter()
                    .enumerate()
                    .map(|(index, pin)| {
                        self.eval_input(pin)
                            .filter(|expression| !expression.is_empty())
                            .unwrap_or_else(|| float_literal(op.fallback(index)))
                    })
                    .collect();

                (*ty, op.expression(&operands))
            }
            NodeKind::TexCoord | NodeKind::Material => return,
        };

        self.pending
            .push_str(&format!("{} {} = {};\n", ty.hlsl(), node.id(), expression));
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        pin,
        shader::{
            graph::{ArithmeticOp, NodeGraph},
            value::ParamValue,
        },
    };

    use float_eq::assert_float_eq;

    fn textured_graph() -> NodeGraph<Validated> {
        let mut graph = NodeGraph::new();
        let root = graph.root();

        let albedo = graph.add_node(NodeKind::TextureSample {
            texture: "AlbedoMap".into(),
        });
        let tint = graph.add_parameter(ParamValue::float3(1., 0.5, 0.25));
        let tinted = graph.add_node(NodeKind::Arithmetic {
            op: ArithmeticOp::Multiply,
            ty: ValueType::Float3,
        });

        graph
            .connect(&pin!(tinted => "a"), &pin!(albedo => "rgb"))
            .unwrap()
            .connect(&pin!(tinted => "b"), &pin!(tint => "value"))
            .unwrap()
            .connect(&pin!(root => "diffuse"), &pin!(tinted => "out"))
            .unwrap()
            .connect(&pin!(root => "opacity"), &pin!(albedo => "a"))
            .unwrap();

        graph.validate().unwrap()
    }

    #[test]
    fn channel_source() {
        let evaluation = evaluate(&textured_graph());

        assert_eq!(
            evaluation.channel(MaterialChannel::Diffuse).unwrap(),
            "float4 n1 = AlbedoMap.Sample(MaterialSampler, input.uv);\n\
             float3 n2 = float3(param0, param1, param2);\n\
             float3 n3 = (n1.rgb * n2);\n\
             float3 diffuse = n3;\n"
        );

        // Already declared by the diffuse channel.
        assert_eq!(
            evaluation.channel(MaterialChannel::Opacity).unwrap(),
            "float opacity = n1.a;\n"
        );

        // Unconnected channels use their default literal.
        assert_eq!(
            evaluation.channel(MaterialChannel::Normal).unwrap(),
            "float3 normal = float3(0.0, 0.0, 1.0);\n"
        );

        assert_eq!(evaluation.textures, vec!["AlbedoMap".to_string()]);
        assert_eq!(
            evaluation.texture_declarations(),
            "Texture2D AlbedoMap;\n"
        );
    }

    #[test]
    fn deterministic() {
        let graph = textured_graph();

        let first = evaluate(&graph);
        let second = evaluate(&graph);

        assert_eq!(first.source(), second.source());
        assert_eq!(first.cbuffer.size(), second.cbuffer.size());
        assert_eq!(first, second);
    }

    #[test]
    fn shared_parameter_declared_once() {
        let mut graph = NodeGraph::new();
        let root = graph.root();

        let one = graph.add_parameter(ParamValue::float(1.));
        let again = graph.add_parameter(ParamValue::float(1.));
        assert_eq!(one, again);

        graph
            .connect(&pin!(root => "opacity"), &pin!(one => "value"))
            .unwrap()
            .connect(&pin!(root => "ambient_occlusion"), &pin!(again => "value"))
            .unwrap();

        let source = evaluate(&graph.validate().unwrap()).source();

        assert_eq!(source.matches(&format!("float {} =", one.node)).count(), 1);
        assert!(source.contains("float opacity = n1;"));
        assert!(source.contains("float ambient_occlusion = n1;"));
    }

    #[test]
    fn constant_buffer_layout() {
        let mut graph = NodeGraph::new();
        let root = graph.root();

        let roughness = graph.add_parameter(ParamValue::float(0.25));
        let emissive = graph.add_parameter(ParamValue::float3(0., 2., 4.));
        let pulse = graph.add_parameter(ParamValue::float(8.));

        graph
            .connect(&pin!(emissive => "y"), &pin!(pulse => "value"))
            .unwrap()
            .connect(&pin!(root => "roughness"), &pin!(roughness => "value"))
            .unwrap()
            .connect(&pin!(root => "emissive"), &pin!(emissive => "value"))
            .unwrap();

        let evaluation = evaluate(&graph.validate().unwrap());
        let layout = &evaluation.cbuffer;

        // roughness, three emissive slots, then the pulse feeding emissive.y
        assert_eq!(layout.size(), 20);
        assert_eq!(layout.gpu_size(), 32);
        assert_eq!(
            layout
                .fields()
                .iter()
                .map(|field| field.offset)
                .collect::<Vec<_>>(),
            vec![0, 4, 8, 12, 16]
        );
        assert_eq!(layout.declarations().lines().count(), 5);

        assert!(evaluation
            .channel(MaterialChannel::Emissive)
            .unwrap()
            .contains("float3 n2 = float3(param1, n3, param3);"));

        let data = layout.initial_data();
        assert_eq!(data.len(), 32);
        let floats: Vec<f32> = data[..20]
            .chunks_exact(4)
            .map(|bytes| f32::from_ne_bytes(bytes.try_into().unwrap()))
            .collect();
        assert_float_eq!(floats[0], 0.25, abs <= f32::EPSILON);
        assert_float_eq!(floats[2], 2., abs <= f32::EPSILON);
        assert_float_eq!(floats[4], 8., abs <= f32::EPSILON);
    }

    #[test]
    fn arithmetic_fallbacks() {
        let mut graph = NodeGraph::new();
        let root = graph.root();

        let lerp = graph.add_node(NodeKind::Arithmetic {
            op: ArithmeticOp::Lerp,
            ty: ValueType::Float,
        });
        graph
            .connect(&pin!(root => "metallic"), &pin!(lerp => "out"))
            .unwrap();

        let evaluation = evaluate(&graph.validate().unwrap());
        assert!(evaluation
            .channel(MaterialChannel::Metallic)
            .unwrap()
            .starts_with("float n1 = lerp(0.0, 1.0, 0.5);\n"));
        assert_eq!(evaluation.cbuffer.size(), 0);
    }
}
