//! Fixed semantic channels of the material root node.

use super::value::{ParamValue, ValueType};

use std::str::FromStr;

macro_rules! channels {
    { $($(#[$attr:meta])* $channel:ident : $name:literal, $ty:ident = $default:expr),+ $(,)? } => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        /// Semantic shading input of a material, in template marker order.
        pub enum MaterialChannel {
            $(
                $(#[$attr])*
                $channel,
            )+
        }

        impl MaterialChannel {
            /// Every channel, in pin and marker order.
            pub const ALL: &'static [MaterialChannel] = &[$(Self::$channel),+];

            /// Pin name on the material root, also used as the local variable name.
            pub fn name(self) -> &'static str {
                match self {
                    $(Self::$channel => $name,)+
                }
            }

            /// Value type expected by the template.
            pub fn ty(self) -> ValueType {
                match self {
                    $(Self::$channel => ValueType::$ty,)+
                }
            }

            /// Value used when nothing else is authored for the channel.
            pub fn default_value(self) -> ParamValue {
                match self {
                    $(Self::$channel => $default,)+
                }
            }
        }

        impl FromStr for MaterialChannel {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(match s {
                    $($name => Self::$channel,)+
                    other => Err(format!("Unknown material channel `{other}`."))?,
                })
            }
        }
    };
}

channels! {
    /// Base color.
    Diffuse: "diffuse", Float3 = ParamValue::float3(1., 1., 1.),
    /// Coverage, 1 is fully opaque.
    Opacity: "opacity", Float = ParamValue::float(1.),
    /// Tangent space normal.
    Normal: "normal", Float3 = ParamValue::float3(0., 0., 1.),
    #[allow(missing_docs)]
    Roughness: "roughness", Float = ParamValue::float(0.5),
    #[allow(missing_docs)]
    Metallic: "metallic", Float = ParamValue::float(0.),
    /// Self illumination color.
    Emissive: "emissive", Float3 = ParamValue::float3(0., 0., 0.),
    #[allow(missing_docs)]
    AmbientOcclusion: "ambient_occlusion", Float = ParamValue::float(1.),
}

impl MaterialChannel {
    /// Position of the channel on the material root.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Template marker replaced by this channel's generated source.
    pub fn marker(self) -> String {
        format!("//%INPUT{}", self.index())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn order_matches_index() {
        for (index, channel) in MaterialChannel::ALL.iter().enumerate() {
            assert_eq!(channel.index(), index);
            assert_eq!(channel.name().parse::<MaterialChannel>(), Ok(*channel));
            assert_eq!(channel.default_value().ty(), channel.ty());
        }

        assert_eq!(MaterialChannel::Normal.marker(), "//%INPUT2");
    }
}
