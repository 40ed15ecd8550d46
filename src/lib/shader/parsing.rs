//! Text format for material graphs.
//!
//! A graph file declares nodes, then wires outputs to inputs. The material root is always
//! available under the name `material`:
//!
//! ```text
//! # Tinted albedo
//! node albedo = texture("AlbedoMap")
//! node tint = vector(1.0, 0.8, 0.6)
//! node tinted = multiply<float3>
//!
//! albedo.rgb -> tinted.a
//! tint.value -> tinted.b
//! tinted.out -> material.diffuse
//! ```

use pest::{error::LineColLocation, iterators::Pair, Parser, Span};
use pest_derive::Parser;

use super::{
    graph::{self, ArithmeticOp, NodeGraph, NodeKind, NodeRef, PinRef},
    value::{float_literal, ParamValue, ValueType},
};

use crate::{Unvalidated, Validated};

use std::{collections::HashMap, fmt::Display};

/// Name the material root is bound to.
pub const ROOT_NAME: &str = "material";

/// Result of graph text parsing.
pub type PResult<T> = Result<T, self::Error>;

#[derive(Debug)]
/// Graph text error along with where it happened, when known.
pub struct Error {
    kind: ErrorKind,
    line: Option<LineColLocation>,
}

impl Error {
    fn new(kind: ErrorKind, line: Option<LineColLocation>) -> Self {
        Self { kind, line }
    }

    fn code(error: CodeError, span: Span) -> Self {
        Self::new(ErrorKind::Code(error), Some(lcl_from_span(span)))
    }

    #[allow(missing_docs)]
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Location of the offending text.
    pub fn line(&self) -> Option<&LineColLocation> {
        self.line.as_ref()
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.line {
            Some(LineColLocation::Pos((line, col)) | LineColLocation::Span((line, col), _)) => {
                write!(f, "{line}:{col}: {}", self.kind)
            }
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        std::error::Error::source(&self.kind)
    }
}

#[derive(Debug, thiserror::Error)]
#[allow(missing_docs)]
pub enum ErrorKind {
    #[error("{0}")]
    Parsing(Box<pest::error::Error<Rule>>),
    #[error(transparent)]
    Code(#[from] CodeError),
}

#[derive(Debug, PartialEq, thiserror::Error)]
/// Well-formed text describing an invalid graph.
pub enum CodeError {
    #[error("Node `{0}` is already defined")]
    /// Declaring the same node name twice, `material` included.
    Redefinition(String),
    #[error("Node `{0}` is not defined")]
    /// Linking a pin of an undeclared node.
    Undefined(String),
    #[error("Number `{0}` does not fit a finite float")]
    /// Literal overflowing to infinity.
    NonFinite(String),
    #[error(transparent)]
    /// Connection or validation failure.
    Graph(#[from] graph::Error),
}

#[derive(Parser)]
#[grammar = "lib/pest/grammar.pest"]
struct GraphParser;

fn lcl_from_span(span: Span) -> LineColLocation {
    let (start, end) = span.split();
    LineColLocation::Span(start.line_col(), end.line_col())
}

/// Builds and validates a [NodeGraph] from its text form.
pub fn parse_graph(text: &str) -> PResult<NodeGraph<Validated>> {
    let mut pairs = GraphParser::parse(Rule::program, text).map_err(|err| {
        let line = err.line_col.clone();
        Error::new(ErrorKind::Parsing(Box::new(err)), Some(line))
    })?;

    let mut graph = NodeGraph::new();
    let mut names = HashMap::from([(ROOT_NAME.to_string(), graph.root())]);

    for statement in pairs.next().unwrap().into_inner() {
        match statement.as_rule() {
            Rule::node_decl => parse_node(statement, &mut graph, &mut names)?,
            Rule::link => parse_link(statement, &mut graph, &names)?,
            _ => (),
        }
    }

    graph
        .validate()
        .map_err(|err| Error::new(ErrorKind::Code(err.into()), None))
}

fn parse_node(
    decl: Pair<Rule>,
    graph: &mut NodeGraph<Unvalidated>,
    names: &mut HashMap<String, NodeRef>,
) -> PResult<()> {
    let span = decl.as_span();
    let mut inner = decl.into_inner();

    let name = inner.next().unwrap().as_str();
    if names.contains_key(name) {
        return Err(Error::code(CodeError::Redefinition(name.to_owned()), span));
    }

    let node = graph.add_node(parse_kind(inner.next().unwrap())?);
    names.insert(name.to_owned(), node);

    Ok(())
}

fn parse_kind(kind: Pair<Rule>) -> PResult<NodeKind> {
    Ok(match kind.as_rule() {
        Rule::scalar => NodeKind::Scalar(parse_number(kind.into_inner().next().unwrap())?),
        Rule::vector => {
            let components = kind
                .into_inner()
                .map(parse_number)
                .collect::<PResult<Vec<_>>>()?;
            // The grammar only admits 2 to 4 components.
            NodeKind::Vector(ParamValue::from_components(&components).unwrap())
        }
        Rule::texture => NodeKind::TextureSample {
            texture: kind
                .into_inner()
                .next()
                .unwrap()
                .into_inner()
                .next()
                .unwrap()
                .as_str()
                .to_owned(),
        },
        Rule::texcoord => NodeKind::TexCoord,
        Rule::arithmetic => {
            let mut inner = kind.into_inner();
            NodeKind::Arithmetic {
                op: inner.next().unwrap().as_str().parse::<ArithmeticOp>().unwrap(),
                ty: inner.next().unwrap().as_str().parse::<ValueType>().unwrap(),
            }
        }
        rule => unreachable!("{rule:?} is not a node kind"),
    })
}

fn parse_number(number: Pair<Rule>) -> PResult<f32> {
    let value: f32 = number.as_str().parse().unwrap();

    if value.is_finite() {
        Ok(value)
    } else {
        Err(Error::code(
            CodeError::NonFinite(number.as_str().to_owned()),
            number.as_span(),
        ))
    }
}

fn parse_link(
    link: Pair<Rule>,
    graph: &mut NodeGraph<Unvalidated>,
    names: &HashMap<String, NodeRef>,
) -> PResult<()> {
    let span = link.as_span();
    let mut inner = link.into_inner();

    let output = parse_pin(inner.next().unwrap(), names)?;
    let input = parse_pin(inner.next().unwrap(), names)?;

    graph
        .connect(&input, &output)
        .map(|_| ())
        .map_err(|err| Error::code(err.into(), span))
}

fn parse_pin(pin: Pair<Rule>, names: &HashMap<String, NodeRef>) -> PResult<PinRef> {
    let span = pin.as_span();
    let mut inner = pin.into_inner();

    let node = inner.next().unwrap().as_str();
    let name = inner.next().unwrap().as_str();

    names
        .get(node)
        .map(|node| node.pin(name))
        .ok_or_else(|| Error::code(CodeError::Undefined(node.to_owned()), span))
}

impl Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKind::Scalar(value) => write!(f, "scalar({})", float_literal(*value)),
            NodeKind::Vector(value) => write!(
                f,
                "vector({})",
                value
                    .components()
                    .iter()
                    .copied()
                    .map(float_literal)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            NodeKind::TextureSample { texture } => write!(f, "texture(\"{texture}\")"),
            NodeKind::TexCoord => write!(f, "texcoord"),
            NodeKind::Arithmetic { op, ty } => write!(f, "{}<{ty}>", op.keyword()),
            NodeKind::Material => write!(f, "{ROOT_NAME}"),
        }
    }
}

impl<State> Display for NodeGraph<State> {
    /// Writes the graph in the format read by [parse_graph]. Nodes are named after their id.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let root = self.root().node;
        let name = |id: graph::NodeId| {
            if id == root {
                ROOT_NAME.to_string()
            } else {
                id.to_string()
            }
        };

        for node in self.nodes().iter().filter(|node| node.id() != root) {
            writeln!(f, "node {} = {}", name(node.id()), node.kind())?;
        }

        for node in self.nodes() {
            for input in node.inputs() {
                let Some(source) = input.source() else {
                    continue;
                };
                let Some(output) = self
                    .node(source.node)
                    .and_then(|feeder| feeder.outputs().get(source.output))
                else {
                    continue;
                };

                writeln!(
                    f,
                    "{}.{} -> {}.{}",
                    name(source.node),
                    output.name(),
                    name(node.id()),
                    input.name()
                )?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::shader::{channel::MaterialChannel, eval::evaluate, graph::NodeId};

    const TINTED: &str = r#"
        # Tinted albedo
        node albedo = texture("AlbedoMap")
        node tint = vector(1.0, 0.8, 0.6)
        node tinted = multiply<float3>
        node rough = scalar(0.25)

        albedo.rgb -> tinted.a
        tint.value -> tinted.b
        tinted.out -> material.diffuse
        rough.value -> material.roughness
        albedo.a -> material.opacity
    "#;

    #[test]
    fn full_parse() {
        let res = parse_graph(TINTED);
        assert!(res.is_ok(), "{res:?}");

        let graph = res.unwrap();
        assert_eq!(graph.nodes().len(), 5);
        assert_eq!(
            graph.node(NodeId::from(3)).unwrap().kind(),
            &NodeKind::Arithmetic {
                op: ArithmeticOp::Multiply,
                ty: ValueType::Float3
            }
        );

        let evaluation = evaluate(&graph);
        assert_eq!(
            evaluation.channel(MaterialChannel::Roughness),
            Some("float n4 = param3;\nfloat roughness = n4;\n")
        );
    }

    #[test]
    fn syntax_error() {
        let err = parse_graph("node a = scalar(1.0\n").unwrap_err();

        assert!(matches!(err.kind(), ErrorKind::Parsing(_)));
        assert!(err.line().is_some());
    }

    #[test]
    fn redefinition() {
        let err = parse_graph("node a = texcoord\nnode a = texcoord").unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::Code(CodeError::Redefinition(name)) if name == "a"
        ));

        let err = parse_graph("node material = texcoord").unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::Code(CodeError::Redefinition(_))
        ));
    }

    #[test]
    fn undefined_node() {
        let err = parse_graph("ghost.value -> material.opacity").unwrap_err();

        assert!(matches!(
            err.kind(),
            ErrorKind::Code(CodeError::Undefined(name)) if name == "ghost"
        ));
        assert!(matches!(
            err.line(),
            Some(LineColLocation::Span((1, 1), _))
        ));
    }

    #[test]
    fn invalid_links() {
        let err = parse_graph("node c = vector(1.0, 0.0, 0.0, 1.0)\nc.value -> material.diffuse")
            .unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::Code(CodeError::Graph(graph::Error::MismatchedTypes { .. }))
        ));

        let cycle = "node a = add<float>\nnode b = add<float>\na.out -> b.a\nb.out -> a.a";
        let err = parse_graph(cycle).unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::Code(CodeError::Graph(graph::Error::Cycle { .. }))
        ));
        assert!(err.line().is_none());
    }

    #[test]
    fn unwritable_payloads() {
        let err = parse_graph("node a = scalar(0.5)\nnode b = vector(1.0, 1e999)").unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::Code(CodeError::NonFinite(text)) if text == "1e999"
        ));
        assert!(matches!(
            err.line(),
            Some(LineColLocation::Span((2, 22), _))
        ));

        for name in ["", "my texture", "albedo;", "a\nb"] {
            let text = format!("node t = texture(\"{name}\")");
            let err = parse_graph(&text).unwrap_err();
            assert!(matches!(err.kind(), ErrorKind::Parsing(_)), "{name:?}");
        }

        assert!(parse_graph("node t = texture(\"Albedo_2\")").is_ok());
    }

    #[test]
    fn display_is_parsable() {
        let graph = parse_graph(TINTED).unwrap();
        let text = graph.to_string();

        assert!(text.contains("node n1 = texture(\"AlbedoMap\")\n"), "{text}");
        assert!(text.contains("n3.out -> material.diffuse\n"), "{text}");

        let reparsed = parse_graph(&text).unwrap();
        assert_eq!(evaluate(&reparsed).source(), evaluate(&graph).source());
    }
}
