//! Record shapes and their on-disk encoding.
//!
//! Records are a flat sequence of little-endian fields without any version tag. Strings and paths
//! are a `u32` byte length followed by UTF-8 bytes, timestamps and hashes are `u64`.

use std::{
    fmt::Debug,
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::modified_time;

/// A record persisted by a [CacheStore](super::CacheStore).
pub trait CacheRecord: Clone + Debug + PartialEq + Sized {
    /// Extension of the record files.
    const EXTENSION: &'static str;

    /// Source path whose location relative to the source root is mirrored in the cache tree.
    fn anchor(&self) -> &Path;

    #[allow(missing_docs)]
    fn read_from<R: Read>(rdr: &mut R) -> io::Result<Self>;

    #[allow(missing_docs)]
    fn write_to<W: Write>(&self, wtr: &mut W) -> io::Result<()>;
}

trait Field: Sized {
    fn parse<R: Read>(rdr: &mut R) -> io::Result<Self>;
    fn emit<W: Write>(&self, wtr: &mut W) -> io::Result<()>;
}

impl Field for u64 {
    fn parse<R: Read>(rdr: &mut R) -> io::Result<Self> {
        rdr.read_u64::<LittleEndian>()
    }

    fn emit<W: Write>(&self, wtr: &mut W) -> io::Result<()> {
        wtr.write_u64::<LittleEndian>(*self)
    }
}

impl Field for String {
    fn parse<R: Read>(rdr: &mut R) -> io::Result<Self> {
        let len = rdr.read_u32::<LittleEndian>()? as usize;

        let mut bytes = Vec::new();
        rdr.take(len as u64).read_to_end(&mut bytes)?;
        if bytes.len() != len {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }

        String::from_utf8(bytes).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }

    fn emit<W: Write>(&self, wtr: &mut W) -> io::Result<()> {
        let len = u32::try_from(self.len())
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;

        wtr.write_u32::<LittleEndian>(len)?;
        wtr.write_all(self.as_bytes())
    }
}

impl Field for PathBuf {
    fn parse<R: Read>(rdr: &mut R) -> io::Result<Self> {
        <String as Field>::parse(rdr).map(PathBuf::from)
    }

    fn emit<W: Write>(&self, wtr: &mut W) -> io::Result<()> {
        self.to_string_lossy().into_owned().emit(wtr)
    }
}

// `None` is stored as an empty path.
impl Field for Option<PathBuf> {
    fn parse<R: Read>(rdr: &mut R) -> io::Result<Self> {
        PathBuf::parse(rdr).map(|path| (!path.as_os_str().is_empty()).then_some(path))
    }

    fn emit<W: Write>(&self, wtr: &mut W) -> io::Result<()> {
        self.clone().unwrap_or_default().emit(wtr)
    }
}

impl Field for Vec<String> {
    fn parse<R: Read>(rdr: &mut R) -> io::Result<Self> {
        let count = rdr.read_u32::<LittleEndian>()?;
        (0..count).map(|_| <String as Field>::parse(rdr)).collect()
    }

    fn emit<W: Write>(&self, wtr: &mut W) -> io::Result<()> {
        let count = u32::try_from(self.len())
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;

        wtr.write_u32::<LittleEndian>(count)?;
        self.iter().try_for_each(|define| define.emit(wtr))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
/// Record of a raw shader compile, a template or a shared include.
pub struct ShaderRecord {
    #[allow(missing_docs)]
    pub source: PathBuf,
    /// Source modification time, see [modified_time].
    pub source_modified: u64,
    /// Compiled artifact, if the record describes one.
    pub output: Option<PathBuf>,
    #[allow(missing_docs)]
    pub entry: String,
    #[allow(missing_docs)]
    pub profile: String,
    /// Macros in command line order.
    pub macros: Vec<String>,
}

impl ShaderRecord {
    /// Record describing `source` as it currently is on disk, `None` if it is missing.
    pub fn probe(
        source: impl Into<PathBuf>,
        output: Option<PathBuf>,
        entry: &str,
        profile: &str,
        macros: &[&str],
    ) -> Option<Self> {
        let source = source.into();

        Some(Self {
            source_modified: modified_time(&source)?,
            source,
            output,
            entry: entry.to_owned(),
            profile: profile.to_owned(),
            macros: macros.iter().map(|define| define.to_string()).collect(),
        })
    }

    /// Template level record: only the template itself, its entry and its profile.
    pub fn template(template: impl Into<PathBuf>, entry: &str, profile: &str) -> Option<Self> {
        Self::probe(template, None, entry, profile, &[])
    }

    /// Shared include record.
    pub fn include(path: impl Into<PathBuf>) -> Option<Self> {
        Self::probe(path, None, "", "", &[])
    }
}

impl CacheRecord for ShaderRecord {
    const EXTENSION: &'static str = "shadercache";

    fn anchor(&self) -> &Path {
        &self.source
    }

    fn read_from<R: Read>(rdr: &mut R) -> io::Result<Self> {
        Ok(Self {
            source: Field::parse(rdr)?,
            source_modified: Field::parse(rdr)?,
            output: Field::parse(rdr)?,
            entry: Field::parse(rdr)?,
            profile: Field::parse(rdr)?,
            macros: Field::parse(rdr)?,
        })
    }

    fn write_to<W: Write>(&self, wtr: &mut W) -> io::Result<()> {
        self.source.emit(wtr)?;
        self.source_modified.emit(wtr)?;
        self.output.emit(wtr)?;
        self.entry.emit(wtr)?;
        self.profile.emit(wtr)?;
        self.macros.emit(wtr)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
/// Record of one compiled material variant.
pub struct MaterialRecord {
    /// Template the variant was generated from.
    pub source: PathBuf,
    /// Template modification time.
    pub source_modified: u64,
    /// Logical path of the owning material.
    pub material: PathBuf,
    /// [macro_hash](super::macro_hash) of the variant's macro set.
    pub macro_hash: u64,
    /// Compiled artifact modification time.
    pub output_modified: u64,
}

impl MaterialRecord {
    /// Record for the variant compiled to `output`, `None` if the template or the artifact is
    /// missing.
    pub fn probe(
        template: impl Into<PathBuf>,
        material: impl Into<PathBuf>,
        macro_hash: u64,
        output: impl AsRef<Path>,
    ) -> Option<Self> {
        let source = template.into();

        Some(Self {
            source_modified: modified_time(&source)?,
            output_modified: modified_time(output)?,
            source,
            material: material.into(),
            macro_hash,
        })
    }
}

impl CacheRecord for MaterialRecord {
    const EXTENSION: &'static str = "materialcache";

    fn anchor(&self) -> &Path {
        &self.material
    }

    fn read_from<R: Read>(rdr: &mut R) -> io::Result<Self> {
        Ok(Self {
            source: Field::parse(rdr)?,
            source_modified: Field::parse(rdr)?,
            material: Field::parse(rdr)?,
            macro_hash: Field::parse(rdr)?,
            output_modified: Field::parse(rdr)?,
        })
    }

    fn write_to<W: Write>(&self, wtr: &mut W) -> io::Result<()> {
        self.source.emit(wtr)?;
        self.source_modified.emit(wtr)?;
        self.material.emit(wtr)?;
        self.macro_hash.emit(wtr)?;
        self.output_modified.emit(wtr)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn shader_record() -> ShaderRecord {
        ShaderRecord {
            source: "Shaders/Post/Bloom.hlsl".into(),
            source_modified: 0x0102_0304_0506_0708,
            output: Some("Compiled/Shaders/Post/Bloom_00.spv".into()),
            entry: "main".into(),
            profile: "ps_6_6".into(),
            macros: vec!["WITH_ALPHATEST".into(), "QUALITY=2".into()],
        }
    }

    #[test]
    fn shader_record_layout() {
        let mut bytes = Vec::new();
        shader_record().write_to(&mut bytes).unwrap();

        assert_eq!(&bytes[..4], &23u32.to_le_bytes());
        assert_eq!(&bytes[4..27], b"Shaders/Post/Bloom.hlsl");
        assert_eq!(&bytes[27..35], &0x0102_0304_0506_0708u64.to_le_bytes());

        let record = ShaderRecord::read_from(&mut bytes.as_slice()).unwrap();
        assert_eq!(record, shader_record());
    }

    #[test]
    fn missing_output_is_empty() {
        let record = ShaderRecord {
            output: None,
            ..shader_record()
        };

        let mut bytes = Vec::new();
        record.write_to(&mut bytes).unwrap();

        let output_len = 4 + 23 + 8;
        assert_eq!(&bytes[output_len..output_len + 4], &0u32.to_le_bytes());
        assert_eq!(
            ShaderRecord::read_from(&mut bytes.as_slice()).unwrap(),
            record
        );
    }

    #[test]
    fn material_record_layout() {
        let record = MaterialRecord {
            source: "Shaders/Templates/Material.hlsl".into(),
            source_modified: 7,
            material: "Materials/Brick.mat".into(),
            macro_hash: 42,
            output_modified: 9,
        };

        let mut bytes = Vec::new();
        record.write_to(&mut bytes).unwrap();

        // path, u64, path, u64, u64
        assert_eq!(bytes.len(), 4 + 31 + 8 + 4 + 19 + 8 + 8);
        assert_eq!(&bytes[bytes.len() - 16..bytes.len() - 8], &42u64.to_le_bytes());
        assert_eq!(
            MaterialRecord::read_from(&mut bytes.as_slice()).unwrap(),
            record
        );
    }

    #[test]
    fn truncated_records_fail() {
        let mut bytes = Vec::new();
        shader_record().write_to(&mut bytes).unwrap();

        for len in [0, 3, 10, bytes.len() - 1] {
            let err = ShaderRecord::read_from(&mut &bytes[..len]).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof, "length {len}");
        }
    }

    #[test]
    fn probing_requires_sources() {
        let dir = crate::testing::scratch_dir("probe");
        let template = dir.join("Material.hlsl");
        let output = dir.join("out.spv");

        assert_eq!(ShaderRecord::template(&template, "main", "ps_6_6"), None);

        std::fs::write(&template, "//%INPUT0").unwrap();
        let record = ShaderRecord::template(&template, "main", "ps_6_6").unwrap();
        assert_eq!(record.output, None);
        assert!(record.macros.is_empty());

        assert_eq!(MaterialRecord::probe(&template, "m.mat", 0, &output), None);
        std::fs::write(&output, [0u8; 4]).unwrap();
        assert!(MaterialRecord::probe(&template, "m.mat", 0, &output).is_some());
    }
}
