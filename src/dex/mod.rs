//! Dex image reading, method-body editing and the located-item bookkeeping behind it.

#[macro_use]
pub mod error;

pub mod dex_file;
pub mod location;
pub mod method_body;

pub use dex_file::DexFile;
pub use error::DexError;

// Little-endian primitive readers over a byte slice with a moving cursor
pub(crate) fn read_u1(bytes: &[u8], ix: &mut usize) -> Result<u8, DexError>
{
    if bytes.len() < *ix + 1
    {
        fail!("Unexpected end of stream reading u1 at index {}", *ix);
    }
    let result = bytes[*ix];
    *ix += 1;
    Ok(result)
}

pub(crate) fn read_u2(bytes: &[u8], ix: &mut usize) -> Result<u16, DexError>
{
    if bytes.len() < *ix + 2
    {
        fail!("Unexpected end of stream reading u2 at index {}", *ix);
    }
    let result = u16::from_le_bytes([bytes[*ix], bytes[*ix + 1]]);
    *ix += 2;
    Ok(result)
}

pub(crate) fn read_u4(bytes: &[u8], ix: &mut usize) -> Result<u32, DexError>
{
    if bytes.len() < *ix + 4
    {
        fail!("Unexpected end of stream reading u4 at index {}", *ix);
    }
    let result = u32::from_le_bytes([bytes[*ix], bytes[*ix + 1], bytes[*ix + 2], bytes[*ix + 3]]);
    *ix += 4;
    Ok(result)
}

/// Decode an unsigned LEB128 value. Dex limits these to five bytes.
pub(crate) fn read_uleb128(bytes: &[u8], ix: &mut usize) -> Result<u32, DexError>
{
    let mut value: u32 = 0;
    for count in 0..5
    {
        let byte = read_u1(bytes, ix)?;
        value |= ((byte & 0x7f) as u32).wrapping_shl(7 * count);
        if byte & 0x80 == 0
        {
            return Ok(value);
        }
    }
    fail!("uleb128 longer than 5 bytes ending at index {}", *ix)
}

pub(crate) fn read_x<'a>(
    bytes: &'a [u8],
    ix: &mut usize,
    length: usize,
) -> Result<&'a [u8], DexError>
{
    if bytes.len().saturating_sub(*ix) < length
    {
        fail!("buffer too short for {} byte read at index {}", length, *ix);
    }
    let slice = &bytes[*ix..*ix + length];
    *ix += length;
    Ok(slice)
}
