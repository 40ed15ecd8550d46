//! Uniform color, every other channel left to its default.
//!
//! Channels:
//! - diffuse: `COLOR`
//! - roughness: `ROUGHNESS`

use super::MaterialResult;

use matforge::prelude::*;

use map_macro::hash_map;

const COLOR: [f32; 3] = [0.8, 0.1, 0.1];
const ROUGHNESS: f32 = 0.35;

/// Get a ready-to-use [Material].
pub fn material() -> MaterialResult {
    let [red, green, blue] = COLOR;

    Material::from_inputs(
        "Materials/FlatColor.mat",
        &hash_map! {
            MaterialChannel::Diffuse => ParamValue::float3(red, green, blue).into(),
            MaterialChannel::Roughness => ParamValue::float(ROUGHNESS).into(),
        },
    )
}
