//! Blend of two textures by a factor.
//!
//! Channels:
//! - diffuse: `lerp(left.rgb, right.rgb, factor)`
//!   - factor default: `DEFAULT_FACTOR`
//! - opacity: alpha of the left texture

use super::{GraphResult, MaterialResult};

use matforge::{pin, prelude::*};

const DEFAULT_FACTOR: f32 = 0.5;

/// Get a ready-to-use [Material].
pub fn material() -> MaterialResult {
    Ok(Material::new("Materials/MixColor.mat", graph()?))
}

/// Get the material graph by itself.
pub fn graph() -> GraphResult {
    let mut graph = NodeGraph::new();
    let root = graph.root();

    let uv = graph.add_node(NodeKind::TexCoord);
    let left = graph.add_node(NodeKind::TextureSample {
        texture: "LeftMap".into(),
    });
    let right = graph.add_node(NodeKind::TextureSample {
        texture: "RightMap".into(),
    });
    let factor = graph.add_parameter(ParamValue::float(DEFAULT_FACTOR));
    let mix = graph.add_node(NodeKind::Arithmetic {
        op: ArithmeticOp::Lerp,
        ty: ValueType::Float3,
    });

    graph
        .connect(&pin!(left => "uv"), &pin!(uv => "uv"))?
        .connect(&pin!(right => "uv"), &pin!(uv => "uv"))?
        .connect(&pin!(mix => "a"), &pin!(left => "rgb"))?
        .connect(&pin!(mix => "b"), &pin!(right => "rgb"))?
        .connect(&pin!(mix => "t"), &pin!(factor => "value"))?
        .connect(&pin!(root => "diffuse"), &pin!(mix => "out"))?
        .connect(&pin!(root => "opacity"), &pin!(left => "a"))?;

    graph.validate()
}
