//! RITE02 image loader.
//!
//! Parses the bytecode container into a live irep tree. Multi-byte
//! fields are big-endian and always read byte-wise, so host endianness
//! and alignment requirements never enter the picture. The instruction
//! bytes are not copied: ireps borrow them from the shared image buffer.
//!
//! Any malformed input releases whatever was built so far and comes back
//! as a [`LoadError`]; a half-loaded tree is never observable.

use std::rc::Rc;

use rite_core::{Pool, SymbolTable};

use crate::error::LoadError;
use crate::irep::{
    Irep, Program, CATCH_HANDLER_SIZE, POOL_TT_FLOAT, POOL_TT_INT32, POOL_TT_INT64, POOL_TT_SSTR,
    POOL_TT_STR,
};

/// Fixed image header: magic, version, total size, compiler id.
const HEADER_SIZE: usize = 20;

/// Section header: 4-byte tag, 4-byte size, 4-byte section version.
const SECTION_HEADER_SIZE: usize = 12;

/// The only part of the image header that is validated.
const MAGIC: &[u8; 6] = b"RITE02";

/// Load a RITE02 image. The buffer becomes the shared region every irep
/// of the returned program borrows from.
pub fn load(
    bytes: impl Into<Rc<[u8]>>,
    pool: &mut Pool,
    symbols: &mut SymbolTable,
) -> Result<Program, LoadError> {
    let buf: Rc<[u8]> = bytes.into();
    if buf.len() < HEADER_SIZE || &buf[..MAGIC.len()] != MAGIC {
        return Err(LoadError::BadHeader);
    }

    let mut at = HEADER_SIZE;
    let mut root: Option<Rc<Irep>> = None;
    loop {
        need(&buf, at, 8)?;
        let tag = &buf[at..at + 4];
        let size = be_u32(&buf, at + 4)? as usize;
        if size < 8 {
            return Err(LoadError::BadSection {
                at,
                size: size as u32,
            });
        }

        if tag == b"IREP" {
            need(&buf, at, SECTION_HEADER_SIZE)?;
            let (irep, _) = parse_irep(&buf, at + SECTION_HEADER_SIZE, pool, symbols)?;
            if let Some(old) = root.take() {
                old.release(pool);
            }
            root = Some(irep);
        } else if tag == b"END\0" {
            break;
        }
        // Unknown sections are skipped by their declared size.
        at += size;
    }

    match root {
        Some(root) => Ok(Program::new(root, buf)),
        None => Err(LoadError::MissingIrep),
    }
}

/// Parse one irep record (and, recursively, its children) at `off`.
/// Returns the irep and the total bytes consumed including children.
pub(crate) fn parse_irep(
    buf: &Rc<[u8]>,
    off: usize,
    pool: &mut Pool,
    symbols: &mut SymbolTable,
) -> Result<(Rc<Irep>, usize), LoadError> {
    need(buf, off, 14)?;
    let record_size = be_u32(buf, off)? as usize;
    if record_size < 14 || off + record_size > buf.len() {
        return Err(LoadError::Truncated {
            at: off,
            needed: record_size,
        });
    }

    let nlocals = be_u16(buf, off + 4)?;
    let nregs = be_u16(buf, off + 6)?;
    let rlen = be_u16(buf, off + 8)?;
    let clen = be_u16(buf, off + 10)?;
    let ilen = be_u16(buf, off + 12)?;

    let code_off = off + 14;
    let catch_off = code_off + ilen as usize;
    let pool_off = catch_off + clen as usize * CATCH_HANDLER_SIZE;
    need(buf, code_off, ilen as usize + clen as usize * CATCH_HANDLER_SIZE)?;

    // First pass over the pool: validate every entry and note where each
    // one starts, relative to the pool block.
    let plen = be_u16(buf, pool_off)?;
    let mut offsets: Vec<u16> = Vec::with_capacity(plen as usize);
    let mut p = pool_off + 2;
    for _ in 0..plen {
        offsets.push((p - pool_off) as u16);
        need(buf, p, 1)?;
        let tag = buf[p];
        p += 1;
        let len = match tag {
            POOL_TT_STR | POOL_TT_SSTR => 2 + be_u16(buf, p)? as usize + 1,
            POOL_TT_INT32 => 4,
            POOL_TT_INT64 | POOL_TT_FLOAT => 8,
            _ => return Err(LoadError::UnknownPoolTag { tag, at: p - 1 }),
        };
        need(buf, p, len)?;
        p += len;
    }

    // Symbol table: length-prefixed names, NUL-terminated in the image.
    // Each is interned immediately; the record only keeps ids.
    let slen = be_u16(buf, p)?;
    p += 2;
    let mut sym_ids = Vec::with_capacity(slen as usize);
    for _ in 0..slen {
        let len = be_u16(buf, p)? as usize;
        p += 2;
        need(buf, p, len + 1)?;
        let name = std::str::from_utf8(&buf[p..p + len])
            .map_err(|_| LoadError::BadSymbolName { at: p })?;
        let id = symbols
            .intern(pool, name)
            .ok_or(LoadError::SymbolOverflow)?;
        sym_ids.push(id);
        p += len + 1;
    }

    // One block holds both index tables, contiguously.
    let table_bytes = sym_ids.len() * 2 + offsets.len() * 2;
    let block = if table_bytes > 0 {
        let block = pool.alloc(table_bytes).ok_or(LoadError::OutOfMemory)?;
        let dst = pool.bytes_mut(block);
        for (i, id) in sym_ids.iter().enumerate() {
            dst[i * 2..i * 2 + 2].copy_from_slice(&id.as_u16().to_le_bytes());
        }
        let base = sym_ids.len() * 2;
        for (i, ofs) in offsets.iter().enumerate() {
            dst[base + i * 2..base + i * 2 + 2].copy_from_slice(&ofs.to_le_bytes());
        }
        Some(block)
    } else {
        None
    };

    // Children follow the record back to back.
    let mut children = Vec::with_capacity(rlen as usize);
    let mut consumed = record_size;
    for _ in 0..rlen {
        match parse_irep(buf, off + consumed, pool, symbols) {
            Ok((child, child_bytes)) => {
                children.push(child);
                consumed += child_bytes;
            }
            Err(e) => {
                for child in &children {
                    child.release(pool);
                }
                if let Some(block) = block {
                    pool.free(block);
                }
                return Err(e);
            }
        }
    }

    let irep = Irep::from_parts(
        nlocals,
        nregs,
        clen,
        ilen,
        plen,
        slen,
        Rc::clone(buf),
        code_off as u32,
        catch_off as u32,
        pool_off as u32,
        block,
        children,
    );
    Ok((Rc::new(irep), consumed))
}

fn need(buf: &[u8], at: usize, n: usize) -> Result<(), LoadError> {
    if at.checked_add(n).map_or(true, |end| end > buf.len()) {
        Err(LoadError::Truncated { at, needed: n })
    } else {
        Ok(())
    }
}

fn be_u16(buf: &[u8], at: usize) -> Result<u16, LoadError> {
    need(buf, at, 2)?;
    Ok(u16::from_be_bytes([buf[at], buf[at + 1]]))
}

fn be_u32(buf: &[u8], at: usize) -> Result<u32, LoadError> {
    need(buf, at, 4)?;
    Ok(u32::from_be_bytes([
        buf[at],
        buf[at + 1],
        buf[at + 2],
        buf[at + 3],
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_readers_are_big_endian() {
        let buf = [0x12u8, 0x34, 0x56, 0x78];
        assert_eq!(be_u16(&buf, 0), Ok(0x1234));
        assert_eq!(be_u32(&buf, 0), Ok(0x12345678));
    }

    #[test]
    fn byte_readers_report_truncation() {
        let buf = [0u8; 3];
        assert_eq!(
            be_u32(&buf, 0),
            Err(LoadError::Truncated { at: 0, needed: 4 })
        );
        assert!(be_u16(&buf, 2).is_err());
    }
}
