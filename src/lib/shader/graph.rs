//! Arena-backed material [NodeGraph] implementation.
//!
//! Nodes live in a dense [Vec] owned by their graph and are addressed by [NodeId]. Input pins
//! refer back to the output pin feeding them with a [Source], a `(graph, node, pin)` triple, so
//! the graph stays trivially clonable and serializable.

use super::{
    channel::MaterialChannel,
    value::{ParamValue, ValueType},
};

use crate::{Unvalidated, Validated};

use std::{
    collections::HashSet,
    fmt::Debug,
    marker::PhantomData,
    str::FromStr,
    sync::atomic::{AtomicU64, Ordering},
};

use derive_more::{Display, From};

static NEXT_GRAPH_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display(fmt = "graph#{}", _0)]
/// Identity of a [NodeGraph], unique for the process run.
pub struct GraphId(u64);

impl GraphId {
    fn next() -> Self {
        Self(NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Clone, Copy, Debug, Display, From, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display(fmt = "n{}", _0)]
/// Dense index of a [Node] inside its graph. Also the name of the node's local variable in
/// generated source.
pub struct NodeId(usize);

impl NodeId {
    /// Index in the owning graph's node list.
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Clone, Debug, Default, Display, PartialEq, Eq, Hash)]
/// Wrapper around [String].
pub struct Name(String);

impl From<&str> for Name {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl AsRef<str> for Name {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// Handle to a node of a specific graph, as returned by [NodeGraph::add_node].
pub struct NodeRef {
    /// Owning graph.
    pub graph: GraphId,
    /// Node inside that graph.
    pub node: NodeId,
}

impl NodeRef {
    /// Reference one of this node's pins by name.
    pub fn pin(self, name: impl Into<Name>) -> PinRef {
        PinRef {
            node: self,
            pin: name.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
/// Reference to a named pin of a node.
pub struct PinRef {
    /// Node owning the pin.
    pub node: NodeRef,
    /// Pin name.
    pub pin: Name,
}

#[macro_export]
/// Shorthand to reference node pins.
/// # Example
/// ```
/// use matforge::{pin, shader::graph::{NodeGraph, Name}};
///
/// let graph = NodeGraph::new();
/// let root = graph.root();
///
/// let diffuse = pin!(root => "diffuse");
/// assert_eq!(diffuse.pin, Name::from("diffuse"));
/// assert_eq!(diffuse.node, root);
/// ```
macro_rules! pin {
    ($node:expr => $name:expr) => {
        $crate::shader::graph::NodeRef::pin($node, $name)
    };
}

pub use pin;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// Resolved back-reference from an input pin to the output pin feeding it.
pub struct Source {
    /// Graph the output pin belongs to.
    pub graph: GraphId,
    /// Node owning the output pin.
    pub node: NodeId,
    /// Output pin index on that node.
    pub output: usize,
}

#[derive(Clone, Debug, PartialEq)]
/// Input pin, optionally fed by another node's output.
pub struct InputPin {
    name: Name,
    ty: ValueType,
    source: Option<Source>,
}

impl InputPin {
    fn new(name: &str, ty: ValueType) -> Self {
        Self {
            name: name.into(),
            ty,
            source: None,
        }
    }

    #[allow(missing_docs)]
    pub fn name(&self) -> &Name {
        &self.name
    }

    #[allow(missing_docs)]
    pub fn ty(&self) -> ValueType {
        self.ty
    }

    /// Output pin feeding this input, if connected.
    pub fn source(&self) -> Option<Source> {
        self.source
    }
}

#[derive(Clone, Debug, PartialEq)]
/// Output pin. Selecting a sub-component of the node's value is expressed with a swizzle.
pub struct OutputPin {
    name: Name,
    ty: ValueType,
    swizzle: &'static str,
}

impl OutputPin {
    fn new(name: &str, ty: ValueType, swizzle: &'static str) -> Self {
        Self {
            name: name.into(),
            ty,
            swizzle,
        }
    }

    #[allow(missing_docs)]
    pub fn name(&self) -> &Name {
        &self.name
    }

    #[allow(missing_docs)]
    pub fn ty(&self) -> ValueType {
        self.ty
    }

    /// Suffix appended to the node variable, e.g. `.rgb`. Empty for the whole value.
    pub fn swizzle(&self) -> &'static str {
        self.swizzle
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// Operator of an arithmetic node.
pub enum ArithmeticOp {
    #[allow(missing_docs)]
    Add,
    #[allow(missing_docs)]
    Subtract,
    #[allow(missing_docs)]
    Multiply,
    #[allow(missing_docs)]
    Divide,
    /// `lerp(a, b, t)`
    Lerp,
    /// `1 - a`
    OneMinus,
}

impl ArithmeticOp {
    /// Keyword used by the graph text format.
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Subtract => "subtract",
            Self::Multiply => "multiply",
            Self::Divide => "divide",
            Self::Lerp => "lerp",
            Self::OneMinus => "one_minus",
        }
    }

    /// Input pin names.
    pub fn operands(self) -> &'static [&'static str] {
        match self {
            Self::OneMinus => &["a"],
            Self::Lerp => &["a", "b", "t"],
            _ => &["a", "b"],
        }
    }

    /// Value substituted for an unconnected operand, chosen to leave the other operand intact.
    pub fn fallback(self, operand: usize) -> f32 {
        match (self, operand) {
            (Self::Multiply | Self::Divide, _) => 1.,
            (Self::Lerp, 1) => 1.,
            (Self::Lerp, 2) => 0.5,
            _ => 0.,
        }
    }

    /// Expression combining already evaluated operands.
    pub fn expression(self, operands: &[String]) -> String {
        let operand = |index: usize| operands.get(index).map_or("", String::as_str);

        match self {
            Self::Add => format!("({} + {})", operand(0), operand(1)),
            Self::Subtract => format!("({} - {})", operand(0), operand(1)),
            Self::Multiply => format!("({} * {})", operand(0), operand(1)),
            Self::Divide => format!("({} / {})", operand(0), operand(1)),
            Self::Lerp => format!("lerp({}, {}, {})", operand(0), operand(1), operand(2)),
            Self::OneMinus => format!("(1.0 - {})", operand(0)),
        }
    }
}

impl FromStr for ArithmeticOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "add" => Self::Add,
            "subtract" => Self::Subtract,
            "multiply" => Self::Multiply,
            "divide" => Self::Divide,
            "lerp" => Self::Lerp,
            "one_minus" => Self::OneMinus,
            other => Err(format!("Unknown arithmetic operator `{other}`."))?,
        })
    }
}

const VECTOR_INPUTS: [&str; 4] = ["x", "y", "z", "w"];

#[derive(Clone, Debug, PartialEq)]
/// Closed set of node kinds along with their payload.
pub enum NodeKind {
    /// Scalar parameter read from the material constant buffer.
    Scalar(f32),
    /// 2 to 4 component parameter. Each component reads its own constant buffer slot unless the
    /// matching `x`/`y`/`z`/`w` input is connected.
    Vector(ParamValue),
    /// Sample of a named texture at the `uv` input.
    TextureSample {
        /// Texture variable name.
        texture: String,
    },
    /// Interpolated mesh texture coordinates.
    TexCoord,
    /// Arithmetic over a fixed value type.
    Arithmetic {
        #[allow(missing_docs)]
        op: ArithmeticOp,
        /// Operand and result type.
        ty: ValueType,
    },
    /// Material root, one input pin per [MaterialChannel].
    Material,
}

impl NodeKind {
    /// Parameter node holding `value`.
    pub fn parameter(value: ParamValue) -> Self {
        match value.ty() {
            ValueType::Float => Self::Scalar(value.components()[0]),
            _ => Self::Vector(value),
        }
    }

    /// Whether this is a scalar/vector parameter, the only kinds eligible for deduplication.
    pub fn is_parameter(&self) -> bool {
        matches!(self, Self::Scalar(_) | Self::Vector(_))
    }

    /// Payload of a parameter node.
    pub fn parameter_value(&self) -> Option<ParamValue> {
        match self {
            Self::Scalar(value) => Some(ParamValue::float(*value)),
            Self::Vector(value) => Some(*value),
            _ => None,
        }
    }

    fn pins(&self) -> (Vec<InputPin>, Vec<OutputPin>) {
        use ValueType::*;

        match self {
            Self::Scalar(_) => (vec![], vec![OutputPin::new("value", Float, "")]),
            Self::Vector(value) => (
                VECTOR_INPUTS[..value.ty().components()]
                    .iter()
                    .map(|name| InputPin::new(name, Float))
                    .collect(),
                vec![OutputPin::new("value", value.ty(), "")],
            ),
            Self::TextureSample { .. } => (
                vec![InputPin::new("uv", Float2)],
                vec![
                    OutputPin::new("rgba", Float4, ""),
                    OutputPin::new("rgb", Float3, ".rgb"),
                    OutputPin::new("r", Float, ".r"),
                    OutputPin::new("g", Float, ".g"),
                    OutputPin::new("b", Float, ".b"),
                    OutputPin::new("a", Float, ".a"),
                ],
            ),
            Self::TexCoord => (vec![], vec![OutputPin::new("uv", Float2, "")]),
            Self::Arithmetic { op, ty } => (
                op.operands()
                    .iter()
                    .map(|name| InputPin::new(name, if *name == "t" { Float } else { *ty }))
                    .collect(),
                vec![OutputPin::new("out", *ty, "")],
            ),
            Self::Material => (
                MaterialChannel::ALL
                    .iter()
                    .map(|channel| InputPin::new(channel.name(), channel.ty()))
                    .collect(),
                vec![],
            ),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
/// Graph node. Its pin layout is derived from its [NodeKind] at construction and never changes.
pub struct Node {
    id: NodeId,
    kind: NodeKind,
    inputs: Vec<InputPin>,
    outputs: Vec<OutputPin>,
}

impl Node {
    fn new(id: NodeId, kind: NodeKind) -> Self {
        let (inputs, outputs) = kind.pins();
        Self {
            id,
            kind,
            inputs,
            outputs,
        }
    }

    #[allow(missing_docs)]
    pub fn id(&self) -> NodeId {
        self.id
    }

    #[allow(missing_docs)]
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Input pins in declaration order.
    pub fn inputs(&self) -> &[InputPin] {
        &self.inputs
    }

    /// Output pins in declaration order.
    pub fn outputs(&self) -> &[OutputPin] {
        &self.outputs
    }

    /// Input pin by name.
    pub fn input(&self, name: &Name) -> Option<&InputPin> {
        self.inputs.iter().find(|pin| &pin.name == name)
    }

    fn output_index(&self, name: &Name) -> Option<usize> {
        self.outputs.iter().position(|pin| &pin.name == name)
    }
}

#[derive(Clone, Debug, PartialEq)]
/// Pin side.
pub enum Side {
    #[allow(missing_docs)]
    Input,
    #[allow(missing_docs)]
    Output,
}

#[derive(Debug, PartialEq, thiserror::Error)]
/// [NodeGraph] error
pub enum Error {
    #[error("Pin `{}` of node {} belongs to {owner}, not to {graph}", .pin.pin, .pin.node.node)]
    /// A pin from another graph was handed to [NodeGraph::connect].
    ForeignPin {
        /// Offending pin.
        pin: PinRef,
        /// Graph owning the pin.
        owner: GraphId,
        /// Graph being edited.
        graph: GraphId,
    },

    #[error("Node {0} does not exist")]
    /// Referencing a node index past the end of the node list.
    MissingNode(NodeId),

    #[error("Node {node} has no {side:?} pin `{name}`")]
    /// Trying to get/set a non-existent pin.
    MissingPin {
        #[allow(missing_docs)]
        node: NodeId,
        #[allow(missing_docs)]
        side: Side,
        #[allow(missing_docs)]
        name: Name,
    },

    #[error("Mismatched types between {output} ({output_type}) and {input} ({input_type})")]
    /// Output type cannot feed the input type.
    MismatchedTypes {
        #[allow(missing_docs)]
        output: Name,
        #[allow(missing_docs)]
        output_type: ValueType,
        #[allow(missing_docs)]
        input: Name,
        #[allow(missing_docs)]
        input_type: ValueType,
    },

    #[error("Texture name `{0}` is not an identifier")]
    /// Texture names end up as shader variables.
    InvalidTextureName(String),

    #[error("Parameter node {0} holds a non-finite value")]
    #[allow(missing_docs)]
    NonFiniteParameter(NodeId),

    #[error("Detected a cycle while validating the path {during:?}, reaching node {detected} again")]
    /// Detected a cycle on the node with the given [NodeId].
    Cycle {
        /// Current path.
        during: Vec<NodeId>,
        /// Node detected as already visited in the current path.
        detected: NodeId,
    },
}

#[derive(Debug, PartialEq)]
/// Node graph of one material. Node 0 is always the material root.
pub struct NodeGraph<State> {
    id: GraphId,
    nodes: Vec<Node>,

    /// Current state
    state: PhantomData<State>,
}

impl<State> Clone for NodeGraph<State> {
    /// The clone is a distinct graph: it gets a fresh [GraphId] and its links are rebased onto
    /// it, so pins of one copy are foreign to the other.
    fn clone(&self) -> Self {
        let id = GraphId::next();
        let mut nodes = self.nodes.clone();

        for source in nodes
            .iter_mut()
            .flat_map(|node| node.inputs.iter_mut())
            .filter_map(|pin| pin.source.as_mut())
            .filter(|source| source.graph == self.id)
        {
            source.graph = id;
        }

        Self {
            id,
            nodes,
            state: PhantomData,
        }
    }
}

impl Default for NodeGraph<Unvalidated> {
    fn default() -> Self {
        Self::new()
    }
}

impl<State> NodeGraph<State> {
    #[allow(missing_docs)]
    pub fn id(&self) -> GraphId {
        self.id
    }

    /// The material root node.
    pub fn root(&self) -> NodeRef {
        NodeRef {
            graph: self.id,
            node: NodeId(0),
        }
    }

    /// All nodes, the root first.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    #[allow(missing_docs)]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    /// Handle for a node of this graph.
    pub fn node_ref(&self, id: NodeId) -> Option<NodeRef> {
        self.node(id).map(|_| NodeRef {
            graph: self.id,
            node: id,
        })
    }

    /// Linear scan for a parameter node whose payload equals `candidate`'s. Texture, operator and
    /// root nodes are never considered equivalent.
    pub fn find_equivalent_parameter_node(&self, candidate: &NodeKind) -> Option<NodeRef> {
        let value = candidate.parameter_value()?;

        self.nodes
            .iter()
            .find(|node| node.kind.parameter_value() == Some(value))
            .map(|node| NodeRef {
                graph: self.id,
                node: node.id,
            })
    }

    fn resolve(&self, pin: &PinRef) -> Result<&Node, Error> {
        if pin.node.graph != self.id {
            return Err(Error::ForeignPin {
                pin: pin.clone(),
                owner: pin.node.graph,
                graph: self.id,
            });
        }

        self.node(pin.node.node)
            .ok_or(Error::MissingNode(pin.node.node))
    }
}

impl NodeGraph<Unvalidated> {
    /// Empty graph holding only the material root.
    pub fn new() -> Self {
        Self {
            id: GraphId::next(),
            nodes: vec![Node::new(NodeId(0), NodeKind::Material)],
            state: PhantomData,
        }
    }

    /// Append a node. A second material root is never created; asking for one returns the
    /// existing root.
    pub fn add_node(&mut self, kind: NodeKind) -> NodeRef {
        if kind == NodeKind::Material {
            return self.root();
        }

        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::new(id, kind));

        NodeRef {
            graph: self.id,
            node: id,
        }
    }

    /// Reuse an equivalent parameter node or create one holding `value`.
    pub fn add_parameter(&mut self, value: ParamValue) -> NodeRef {
        let kind = NodeKind::parameter(value);

        self.find_equivalent_parameter_node(&kind)
            .unwrap_or_else(|| self.add_node(kind))
    }

    /// Feed `input` from `output`, replacing any previous source. Both pins must belong to this
    /// graph.
    pub fn connect(&mut self, input: &PinRef, output: &PinRef) -> Result<&mut Self, Error> {
        let source_node = self.resolve(output)?;
        let output_index = source_node
            .output_index(&output.pin)
            .ok_or_else(|| Error::MissingPin {
                node: output.node.node,
                side: Side::Output,
                name: output.pin.clone(),
            })?;
        let output_type = source_node.outputs[output_index].ty;

        let target_node = self.resolve(input)?;
        let target_pin = target_node.input(&input.pin).ok_or_else(|| Error::MissingPin {
            node: input.node.node,
            side: Side::Input,
            name: input.pin.clone(),
        })?;

        if !target_pin.ty.accepts(output_type) {
            return Err(Error::MismatchedTypes {
                output: output.pin.clone(),
                output_type,
                input: input.pin.clone(),
                input_type: target_pin.ty,
            });
        }

        let source = Source {
            graph: self.id,
            node: output.node.node,
            output: output_index,
        };

        self.set_source(input, Some(source))
    }

    /// Remove the source of `input`, falling back to the node's default payload.
    pub fn disconnect(&mut self, input: &PinRef) -> Result<&mut Self, Error> {
        self.resolve(input)?;
        self.set_source(input, None)
    }

    fn set_source(&mut self, input: &PinRef, source: Option<Source>) -> Result<&mut Self, Error> {
        self.nodes[input.node.node.0]
            .inputs
            .iter_mut()
            .find(|pin| pin.name == input.pin)
            .ok_or_else(|| Error::MissingPin {
                node: input.node.node,
                side: Side::Input,
                name: input.pin.clone(),
            })
            .map(|pin| pin.source = source)?;

        Ok(self)
    }

    /// Check the [unvalidated](Unvalidated) graph for cycles and for payloads that cannot be
    /// written as shader code.
    pub fn validate(self) -> Result<NodeGraph<Validated>, Error> {
        for node in &self.nodes {
            match &node.kind {
                NodeKind::TextureSample { texture } if !is_identifier(texture) => {
                    return Err(Error::InvalidTextureName(texture.clone()));
                }
                kind if kind
                    .parameter_value()
                    .is_some_and(|value| !value.components().iter().all(|c| c.is_finite())) =>
                {
                    return Err(Error::NonFiniteParameter(node.id));
                }
                _ => (),
            }
        }

        let mut done = HashSet::new();
        let mut path = Vec::new();

        for node in &self.nodes {
            self.visit(node.id, &mut path, &mut done)?;
        }

        let Self { id, nodes, .. } = self;

        Ok(NodeGraph {
            id,
            nodes,
            state: PhantomData::<Validated>,
        })
    }

    fn visit(
        &self,
        id: NodeId,
        path: &mut Vec<NodeId>,
        done: &mut HashSet<NodeId>,
    ) -> Result<(), Error> {
        if done.contains(&id) {
            return Ok(());
        }

        if path.contains(&id) {
            return Err(Error::Cycle {
                during: path.clone(),
                detected: id,
            });
        }

        // Dangling sources are left for the evaluator to degrade on.
        let Some(node) = self.node(id) else {
            return Ok(());
        };

        path.push(id);
        for source in node.inputs.iter().filter_map(InputPin::source) {
            self.visit(source.node, path, done)?;
        }
        path.pop();

        done.insert(id);
        Ok(())
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();

    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl NodeGraph<Validated> {
    /// Go back to the editable state.
    pub fn edit(self) -> NodeGraph<Unvalidated> {
        let Self { id, nodes, .. } = self;

        NodeGraph {
            id,
            nodes,
            state: PhantomData::<Unvalidated>,
        }
    }
}
