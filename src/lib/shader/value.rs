//! Value types carried by pins and the parameter payloads stored in nodes.

use std::{fmt::Display, str::FromStr};

use paste::paste;

macro_rules! value_types {
    { $($(#[$attr:meta])* $name:ident : $hlsl:literal ($($component:ident),+)),+ $(,)? } => {
        paste! {
            #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
            /// Shading-language value types a pin can carry.
            pub enum ValueType {
                #[default]
                $(
                    $(#[$attr])*
                    $name,
                )+
            }

            impl ValueType {
                /// Type name in the generated source.
                pub fn hlsl(self) -> &'static str {
                    match self {
                        $(Self::$name => $hlsl,)+
                    }
                }

                /// Number of scalar components.
                pub fn components(self) -> usize {
                    match self {
                        $(Self::$name => [$(stringify!($component)),+].len(),)+
                    }
                }

                /// Type with the given number of components, if there is one.
                pub fn with_components(count: usize) -> Option<Self> {
                    [$(Self::$name),+].into_iter().find(|ty| ty.components() == count)
                }
            }

            impl FromStr for ValueType {
                type Err = String;

                fn from_str(s: &str) -> Result<Self, Self::Err> {
                    Ok(match s {
                        $($hlsl => Self::$name,)+
                        other => Err(format!("Unrecognized value type `{other}`."))?,
                    })
                }
            }

            impl ParamValue {
                $(
                    #[doc = concat!("`", $hlsl, "` parameter value.")]
                    pub fn [<$name:lower>]($($component: f32),+) -> Self {
                        let components = [$($component),+];
                        let mut data = [0.; 4];
                        data[..components.len()].copy_from_slice(&components);

                        Self {
                            ty: ValueType::$name,
                            data,
                        }
                    }
                )+
            }
        }
    };
}

value_types! {
    /// Single scalar.
    Float: "float" (x),
    /// 2D vector.
    Float2: "float2" (x, y),
    /// 3D vector or RGB color.
    Float3: "float3" (x, y, z),
    /// 4D vector or RGBA color.
    Float4: "float4" (x, y, z, w),
}

impl ValueType {
    /// Whether an output of type `source` may feed an input of this type. Scalars broadcast to
    /// every vector width, everything else must match exactly.
    pub fn accepts(self, source: ValueType) -> bool {
        self == source || source == ValueType::Float
    }
}

impl Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.hlsl())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
/// Constant value of a parameter node or a default of a material channel.
pub struct ParamValue {
    ty: ValueType,
    data: [f32; 4],
}

impl ParamValue {
    /// Build a value from 1 to 4 components.
    pub fn from_components(components: &[f32]) -> Option<Self> {
        let ty = ValueType::with_components(components.len())?;
        let mut data = [0.; 4];
        data[..components.len()].copy_from_slice(components);

        Some(Self { ty, data })
    }

    /// Value type.
    pub fn ty(&self) -> ValueType {
        self.ty
    }

    /// Used components.
    pub fn components(&self) -> &[f32] {
        &self.data[..self.ty.components()]
    }

    /// Inline literal in the generated source, e.g. `0.5` or `float3(1.0, 0.0, 0.0)`.
    pub fn literal(&self) -> String {
        match self.ty {
            ValueType::Float => float_literal(self.data[0]),
            ty => format!(
                "{}({})",
                ty.hlsl(),
                self.components()
                    .iter()
                    .copied()
                    .map(float_literal)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }
}

impl From<f32> for ParamValue {
    fn from(value: f32) -> Self {
        Self::float(value)
    }
}

/// Float literal that always carries a decimal point or an exponent.
pub fn float_literal(value: f32) -> String {
    format!("{value:?}")
}
