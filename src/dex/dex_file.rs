/* Dex file format structures: enough of the id sections and class data for a symbol table */

use crate::dex::error::DexError;
use crate::dex::{read_u1, read_u2, read_u4, read_uleb128, read_x};
use crate::types::{prototype_descriptor, AccessFlags, FieldKey, MethodKey};
use log::{debug, warn};

use std::fs;
use std::path::Path;

/* Constants */
pub const DEX_FILE_MAGIC_PREFIX: [u8; 4] = [ 0x64, 0x65, 0x78, 0x0a ];
pub const HEADER_SIZE: usize = 0x70;
pub const ENDIAN_CONSTANT: u32 = 0x12345678;
pub const NO_INDEX: u32 = 0xffffffff;

type StringId = usize;
type TypeId = usize;
type ProtoId = usize;
type FieldId = usize;
type MethodId = usize;

/// True if `bytes` starts with a dex header magic (`dex\n` followed by a three digit version).
pub fn is_dex(bytes: &[u8]) -> bool
{
    bytes.len() >= 8
        && bytes[..4] == DEX_FILE_MAGIC_PREFIX
        && bytes[4..7].iter().all(u8::is_ascii_digit)
        && bytes[7] == 0
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeList(pub Vec<TypeId>);

impl TypeList
{
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<TypeList, DexError>
    {
        let size = read_u4(bytes, ix)?;
        let mut v = Vec::with_capacity(size.min(0x10000) as usize);
        for _ in 0..size { v.push(read_u2(bytes, ix)? as TypeId); }
        Ok(TypeList(v))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrototypeItem {
    // The proto_id_item struct
    pub shorty_idx: StringId,
    pub return_type_idx: TypeId,
    pub parameters: TypeList
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldItem {
    // The field_id_item struct
    pub class_idx: TypeId,
    pub type_idx: TypeId,
    pub name_idx: StringId
}

impl FieldItem
{
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<FieldItem, DexError>
    {
        Ok(FieldItem {
            class_idx: read_u2(bytes, ix)? as TypeId,
            type_idx: read_u2(bytes, ix)? as TypeId,
            name_idx: read_u4(bytes, ix)? as StringId,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodItem {
    // The method_id_item struct
    pub class_idx: TypeId,
    pub proto_idx: ProtoId,
    pub name_idx: StringId
}

impl MethodItem
{
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<MethodItem, DexError>
    {
        Ok(MethodItem {
            class_idx: read_u2(bytes, ix)? as TypeId,
            proto_idx: read_u2(bytes, ix)? as ProtoId,
            name_idx: read_u4(bytes, ix)? as StringId,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedField
{
    pub field_idx: FieldId,
    pub access_flags: AccessFlags
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedMethod
{
    pub method_idx: MethodId,
    pub access_flags: AccessFlags,
    // Offset of the code_item; bodies are not decoded here
    pub code_off: u32
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassDataItem {
    pub static_fields: Vec<EncodedField>,
    pub instance_fields: Vec<EncodedField>,
    pub direct_methods: Vec<EncodedMethod>,
    pub virtual_methods: Vec<EncodedMethod>,
}

impl ClassDataItem
{
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<ClassDataItem, DexError>
    {
        let static_field_size = read_uleb128(bytes, ix)?;
        let instance_field_size = read_uleb128(bytes, ix)?;
        let direct_method_size = read_uleb128(bytes, ix)?;
        let virtual_method_size = read_uleb128(bytes, ix)?;

        let static_fields = Self::read_fields(bytes, ix, static_field_size)?;
        let instance_fields = Self::read_fields(bytes, ix, instance_field_size)?;
        let direct_methods = Self::read_methods(bytes, ix, direct_method_size)?;
        let virtual_methods = Self::read_methods(bytes, ix, virtual_method_size)?;

        Ok(ClassDataItem { static_fields, instance_fields, direct_methods, virtual_methods })
    }

    // Indices are stored as differences from the previous entry of the same list
    fn read_fields(bytes: &[u8], ix: &mut usize, count: u32) -> Result<Vec<EncodedField>, DexError>
    {
        let mut fields = vec![];
        let mut idx: u32 = 0;
        for _ in 0..count {
            idx = idx.wrapping_add(read_uleb128(bytes, ix)?);
            let access_flags = AccessFlags::from_bits_retain(read_uleb128(bytes, ix)?);
            fields.push(EncodedField { field_idx: idx as FieldId, access_flags });
        }
        Ok(fields)
    }

    fn read_methods(
        bytes: &[u8],
        ix: &mut usize,
        count: u32,
    ) -> Result<Vec<EncodedMethod>, DexError>
    {
        let mut methods = vec![];
        let mut idx: u32 = 0;
        for _ in 0..count {
            idx = idx.wrapping_add(read_uleb128(bytes, ix)?);
            let access_flags = AccessFlags::from_bits_retain(read_uleb128(bytes, ix)?);
            let code_off = read_uleb128(bytes, ix)?;
            methods.push(EncodedMethod { method_idx: idx as MethodId, access_flags, code_off });
        }
        Ok(methods)
    }

    pub fn fields(&self) -> impl Iterator<Item = &EncodedField>
    {
        self.static_fields.iter().chain(self.instance_fields.iter())
    }

    pub fn methods(&self) -> impl Iterator<Item = &EncodedMethod>
    {
        self.direct_methods.iter().chain(self.virtual_methods.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDefItem {
    // The class_def_item struct
    pub class_idx: TypeId,
    pub access_flags: AccessFlags,
    pub superclass_idx: Option<TypeId>,
    pub interfaces: TypeList,
    pub source_file_idx: Option<StringId>,
    pub class_data: Option<ClassDataItem>,
}

impl ClassDefItem
{
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<ClassDefItem, DexError>
    {
        let class_idx = read_u4(bytes, ix)? as TypeId;
        let access_flags = AccessFlags::from_bits_retain(read_u4(bytes, ix)?);
        let superclass_idx = optional_index(read_u4(bytes, ix)?);
        let mut interface_offset = read_u4(bytes, ix)? as usize;
        let interfaces = if interface_offset > 0 { TypeList::read(bytes, &mut interface_offset)? }
            else { TypeList::default() };
        let source_file_idx = optional_index(read_u4(bytes, ix)?);
        let _annotations_off = read_u4(bytes, ix)?;
        let mut class_data_offset = read_u4(bytes, ix)? as usize;
        let class_data = if class_data_offset > 0 {
            match ClassDataItem::read(bytes, &mut class_data_offset) {
                Ok(cd) => Some(cd),
                Err(e) => {
                    warn!("Skipping unreadable class_data_item of type #{}: {}", class_idx, e);
                    None
                }
            }
        }
            else { None };
        let _static_values_off = read_u4(bytes, ix)?;

        Ok(ClassDefItem {
            class_idx,
            access_flags,
            superclass_idx,
            interfaces,
            source_file_idx,
            class_data,
        })
    }
}

fn optional_index(idx: u32) -> Option<usize>
{
    if idx == NO_INDEX { None } else { Some(idx as usize) }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub magic: [u8; 8],
    pub checksum: u32,
    pub signature: [u8; 20],
    pub file_size: u32,
    pub header_size: u32,
    pub endian_tag: u32,
    pub link_size: u32,
    pub link_off: u32,
    pub map_off: u32,
    pub string_ids_size: u32,
    pub string_ids_off: u32,
    pub type_ids_size: u32,
    pub type_ids_off: u32,
    pub proto_ids_size: u32,
    pub proto_ids_off: u32,
    pub field_ids_size: u32,
    pub field_ids_off: u32,
    pub method_ids_size: u32,
    pub method_ids_off: u32,
    pub class_defs_size: u32,
    pub class_defs_off: u32,
    pub data_size: u32,
    pub data_off: u32,
}

impl Header
{
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<Header, DexError>
    {
        if bytes.len() < *ix + HEADER_SIZE {
            return Err(DexError::new("Not enough bytes for header"));
        }
        if !is_dex(&bytes[*ix..]) {
            return Err(DexError::new("Invalid magic value"));
        }

        let mut magic = [0u8; 8];
        magic.copy_from_slice(read_x(bytes, ix, 8)?);
        let checksum = read_u4(bytes, ix)?;
        let mut signature = [0u8; 20];
        signature.copy_from_slice(read_x(bytes, ix, 20)?);

        let header = Header {
            magic,
            checksum,
            signature,
            file_size: read_u4(bytes, ix)?,
            header_size: read_u4(bytes, ix)?,
            endian_tag: read_u4(bytes, ix)?,
            link_size: read_u4(bytes, ix)?,
            link_off: read_u4(bytes, ix)?,
            map_off: read_u4(bytes, ix)?,
            string_ids_size: read_u4(bytes, ix)?,
            string_ids_off: read_u4(bytes, ix)?,
            type_ids_size: read_u4(bytes, ix)?,
            type_ids_off: read_u4(bytes, ix)?,
            proto_ids_size: read_u4(bytes, ix)?,
            proto_ids_off: read_u4(bytes, ix)?,
            field_ids_size: read_u4(bytes, ix)?,
            field_ids_off: read_u4(bytes, ix)?,
            method_ids_size: read_u4(bytes, ix)?,
            method_ids_off: read_u4(bytes, ix)?,
            class_defs_size: read_u4(bytes, ix)?,
            class_defs_off: read_u4(bytes, ix)?,
            data_size: read_u4(bytes, ix)?,
            data_off: read_u4(bytes, ix)?,
        };
        if header.endian_tag != ENDIAN_CONSTANT {
            fail!("Unsupported endian tag 0x{:08x}", header.endian_tag);
        }
        Ok(header)
    }

    /// Numeric dex version from the magic, e.g. 35, 38, 39.
    pub fn version(&self) -> u32
    {
        self.magic[4..7].iter().fold(0, |acc, d| acc * 10 + (d - b'0') as u32)
    }
}

#[derive(Debug, Eq, PartialEq, Clone)]
pub enum DexString
{
    Decoded(String),
    Raw(u32, Vec<u8>),
}

impl DexString
{
    pub fn as_str(&self) -> Result<&str, DexError>
    {
        match self
        {
            DexString::Decoded(s) => Ok(s),
            DexString::Raw(_, _) => Err(DexError::new("DexString failed conversion")),
        }
    }

    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<DexString, DexError>
    {
        let utf16_size = read_uleb128(bytes, ix)?;
        let start = *ix;
        while read_u1(bytes, ix)? != 0 {}
        let v = &bytes[start..*ix - 1];

        Ok(match cesu8::from_java_cesu8(v)
        {
            Ok(converted_str) => DexString::Decoded(converted_str.into_owned()),
            _ => DexString::Raw(utf16_size, v.to_vec())
        })
    }
}

/// The symbol sections of one dex image.
#[derive(Debug, Clone)]
pub struct DexFile {
    pub header: Header,
    pub strings: Vec<DexString>,
    pub types: Vec<StringId>,
    pub prototypes: Vec<PrototypeItem>,
    pub fields: Vec<FieldItem>,
    pub methods: Vec<MethodItem>,
    pub class_defs: Vec<ClassDefItem>,
}

impl DexFile {

    fn read(bytes: &[u8], ix: &mut usize) -> Result<DexFile, DexError>
    {
        let header = Header::read(bytes, ix)?;
        debug!(
            "dex v{:03}: {} strings, {} types, {} fields, {} methods, {} classes",
            header.version(), header.string_ids_size, header.type_ids_size,
            header.field_ids_size, header.method_ids_size, header.class_defs_size
        );

        let mut dex = DexFile {
            header,
            strings: vec![],
            types: vec![],
            prototypes: vec![],
            fields: vec![],
            methods: vec![],
            class_defs: vec![],
        };

        // Read the strings
        *ix = dex.header.string_ids_off as usize;
        for i in 0..dex.header.string_ids_size
        {
            let mut string_off = read_u4(bytes, ix)? as usize;
            let ds = DexString::read(bytes, &mut string_off)
                .map_err(|e| err!(e, "string_id_item #{}", i))?;
            dex.strings.push(ds);
        }

        // Read the type_ids
        *ix = dex.header.type_ids_off as usize;
        for _ in 0..dex.header.type_ids_size
        {
            let descriptor_idx = read_u4(bytes, ix)? as StringId;
            match dex.strings.get(descriptor_idx)
            {
                Some(DexString::Decoded(_)) => dex.types.push(descriptor_idx),
                other => fail!("Invalid type description: {:?}", other),
            }
        }

        // Read the prototypes
        *ix = dex.header.proto_ids_off as usize;
        for _ in 0..dex.header.proto_ids_size
        {
            let shorty_idx = read_u4(bytes, ix)? as StringId;
            let return_type_idx = read_u4(bytes, ix)? as TypeId;
            let mut parameter_offset = read_u4(bytes, ix)? as usize;
            let parameters = if parameter_offset == 0 { TypeList::default() }
                else { TypeList::read(bytes, &mut parameter_offset)? };
            dex.prototypes.push(PrototypeItem { shorty_idx, return_type_idx, parameters });
        }

        // Read the field ids
        *ix = dex.header.field_ids_off as usize;
        for _ in 0..dex.header.field_ids_size
        {
            dex.fields.push(FieldItem::read(bytes, ix)?);
        }

        // Read the method ids
        *ix = dex.header.method_ids_off as usize;
        for _ in 0..dex.header.method_ids_size
        {
            dex.methods.push(MethodItem::read(bytes, ix)?);
        }

        // Read the class defs
        *ix = dex.header.class_defs_off as usize;
        for i in 0..dex.header.class_defs_size
        {
            let class_def = ClassDefItem::read(bytes, ix)
                .map_err(|e| err!(e, "class_def_item #{}", i))?;
            dex.class_defs.push(class_def);
        }

        Ok(dex)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<DexFile, DexError>
    {
        let mut ix = 0;
        DexFile::read(bytes, &mut ix)
    }

    pub fn from_file(path: &Path) -> Result<DexFile, DexError>
    {
        let bytes = fs::read(path).map_err(|e| DexError::new(&format!("io Error: {}", e)))?;
        DexFile::from_bytes(&bytes)
            .map_err(|e| DexError::with_context(e, path.display().to_string()))
    }

    pub fn string(&self, id: StringId) -> Result<&str, DexError>
    {
        match self.strings.get(id)
        {
            Some(s) => s.as_str(),
            None => fail!("string index {} out of range ({} strings)", id, self.strings.len()),
        }
    }

    pub fn type_descriptor(&self, id: TypeId) -> Result<&str, DexError>
    {
        match self.types.get(id)
        {
            Some(string_idx) => self.string(*string_idx),
            None => fail!("type index {} out of range ({} types)", id, self.types.len()),
        }
    }

    pub fn proto_descriptor(&self, id: ProtoId) -> Result<String, DexError>
    {
        let proto = match self.prototypes.get(id)
        {
            Some(p) => p,
            None => fail!("proto index {} out of range ({} protos)", id, self.prototypes.len()),
        };
        let parameters = proto.parameters.0.iter()
            .map(|t| self.type_descriptor(*t))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(prototype_descriptor(&parameters, self.type_descriptor(proto.return_type_idx)?))
    }

    pub fn field_key(&self, id: FieldId) -> Result<FieldKey, DexError>
    {
        let field = match self.fields.get(id)
        {
            Some(f) => f,
            None => fail!("field index {} out of range ({} fields)", id, self.fields.len()),
        };
        Ok(FieldKey::new(
            self.type_descriptor(field.class_idx)?,
            self.string(field.name_idx)?,
            self.type_descriptor(field.type_idx)?,
        ))
    }

    pub fn method_key(&self, id: MethodId) -> Result<MethodKey, DexError>
    {
        let method = match self.methods.get(id)
        {
            Some(m) => m,
            None => fail!("method index {} out of range ({} methods)", id, self.methods.len()),
        };
        Ok(MethodKey::new(
            self.type_descriptor(method.class_idx)?,
            self.string(method.name_idx)?,
            self.proto_descriptor(method.proto_idx)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::fixtures::{DexFixture, FixtureClass};

    fn sample() -> Vec<u8>
    {
        let mut fixture = DexFixture::new();
        fixture.add_class(
            FixtureClass::new("LFoo;")
                .superclass("Ljava/lang/Object;")
                .field("count", "I", AccessFlags::PRIVATE)
                .method("run", &["I", "Ljava/lang/String;"], "V", AccessFlags::PUBLIC),
        );
        fixture.reference_field("LBar;", "x", "J");
        fixture.build()
    }

    #[test]
    fn test_magic_detection()
    {
        assert!(is_dex(b"dex\n035\0rest"));
        assert!(is_dex(b"dex\n039\0"));
        assert!(!is_dex(b"dey\n035\0"));
        assert!(!is_dex(b"dex\n0a5\0"));
        assert!(!is_dex(b"dex\n"));
    }

    #[test]
    fn test_header_from_bytes()
    {
        let bytes = sample();
        let mut ix = 0;
        let header = Header::read(&bytes, &mut ix).expect("Failed to parse DEX header");
        assert_eq!(ix, HEADER_SIZE);
        assert_eq!(header.version(), 35);
        assert_eq!(header.file_size as usize, bytes.len());
        assert_eq!(header.class_defs_size, 1);
    }

    #[test]
    fn test_decode_symbol_sections()
    {
        let dex = DexFile::from_bytes(&sample()).expect("Failed read");
        assert_eq!(dex.class_defs.len(), 1);

        let class_def = &dex.class_defs[0];
        assert_eq!(dex.type_descriptor(class_def.class_idx).unwrap(), "LFoo;");
        let superclass = class_def.superclass_idx.unwrap();
        assert_eq!(dex.type_descriptor(superclass).unwrap(), "Ljava/lang/Object;");

        let class_data = class_def.class_data.as_ref().unwrap();
        let field = class_data.fields().next().unwrap();
        assert_eq!(dex.field_key(field.field_idx).unwrap(), FieldKey::new("LFoo;", "count", "I"));
        assert!(field.access_flags.contains(AccessFlags::PRIVATE));

        let method = class_data.methods().next().unwrap();
        assert_eq!(
            dex.method_key(method.method_idx).unwrap(),
            MethodKey::new("LFoo;", "run", "(ILjava/lang/String;)V")
        );

        let all_fields: Vec<_> = (0..dex.fields.len()).map(|i| dex.field_key(i).unwrap()).collect();
        assert!(all_fields.contains(&FieldKey::new("LBar;", "x", "J")));
    }

    #[test]
    fn test_truncated_input_fails()
    {
        let bytes = sample();
        assert!(DexFile::from_bytes(&bytes[..0x40]).is_err());
        assert!(DexFile::from_bytes(b"PK\x03\x04").is_err());
    }

    #[test]
    fn test_out_of_range_lookups()
    {
        let dex = DexFile::from_bytes(&sample()).unwrap();
        assert!(dex.string(10_000).is_err());
        assert!(dex.field_key(99).is_err());
        assert!(dex.method_key(99).is_err());
    }
}
