//! Preset materials built by the demo.

pub mod flat_color;
pub mod mix_color;

use matforge::{material, prelude::*, shader::graph};

type GraphResult = Result<NodeGraph<Validated>, graph::Error>;
type MaterialResult = Result<Material, material::Error>;

macro_rules! create_presets {
    ($($preset:ident),+ $(,)?) => {
        /// Every preset along with its name.
        pub fn presets() -> Vec<(&'static str, MaterialResult)> {
            vec![
                $(
                    (stringify!($preset), $preset::material())
                ),+
            ]
        }
    };
}

create_presets! {
    flat_color,
    mix_color,
}
