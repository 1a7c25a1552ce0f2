//! Image-resource section parsing.
//!
//! The section is a 4-byte length followed by a run of resource blocks:
//! signature (`8BIM` or `8B64`), 16-bit id, Pascal name padded to an even
//! total including its length byte, then a 4-byte data length and the data
//! padded to even. Unknown ids are retained verbatim; parsing never fails on
//! an id it does not recognize.

use crate::error::{PsdError, PsdResult};
use crate::stream::ByteSource;

const RESOURCE_SIG_8BIM: u32 = 0x3842_494D;
const RESOURCE_SIG_8B64: u32 = 0x3842_3634;

/// One image-resource block, retained as raw bytes.
#[derive(Debug, Clone)]
pub struct ResourceBlock {
    /// Resource id (e.g. 1005 = resolution info, 1039 = ICC profile).
    pub id: u16,
    /// Pascal-string name bytes, usually empty.
    pub name: Vec<u8>,
    /// Raw resource data.
    pub data: Vec<u8>,
}

/// Parses the image-resource section at the current position.
///
/// A block with an unrecognized signature stops block parsing; the stream is
/// then repositioned to the section end so following sections stay aligned.
pub(crate) fn parse_resources<S: ByteSource + ?Sized>(
    source: &mut S,
) -> PsdResult<Vec<ResourceBlock>> {
    // Section length is 4 bytes in both formats.
    let section_length = u64::from(source.read_u32()?);
    if section_length == 0 {
        return Ok(Vec::new());
    }

    let section_start = source.tell()?;
    let section_end = section_start + section_length;

    let mut blocks = Vec::new();
    while source.tell()? < section_end {
        let signature = source.read_u32()?;
        if signature != RESOURCE_SIG_8BIM && signature != RESOURCE_SIG_8B64 {
            // Some writers pad or append non-standard data. Resources are
            // optional metadata, so stop here and realign the stream.
            tracing::debug!(signature, "unknown resource signature, skipping to section end");
            source.seek(section_end)?;
            break;
        }

        let id = source.read_u16()?;

        let name_len = source.read_u8()?;
        let mut name = vec![0u8; usize::from(name_len)];
        source.read_exact(&mut name)?;
        // Name is padded so (length byte + name) totals an even count.
        if (1 + u32::from(name_len)) % 2 != 0 {
            source.skip(1)?;
        }

        // Data length is 4 bytes even in the large-document format.
        let data_len = source.read_u32()?;
        let mut data = vec![0u8; data_len as usize];
        source.read_exact(&mut data)?;
        if data_len % 2 != 0 {
            source.skip(1)?;
        }

        blocks.push(ResourceBlock { id, name, data });
    }

    if source.tell()? != section_end {
        source.seek(section_end)?;
    }

    Ok(blocks)
}
