//! Instruction records.
//!
//! An [`Irep`] is the immutable compiled unit: one per method or block,
//! holding bytecode, a literal pool, a symbol table and child ireps. The
//! raw bytes stay in the image buffer; the irep borrows them through a
//! shared `Rc<[u8]>` region, so nothing is copied at load time and the
//! buffer outlives every record derived from it.
//!
//! The only storage an irep owns outright is a single pool block holding
//! its symbol-id table and its pool-entry offset table, contiguously.
//! Releasing a tree returns exactly those blocks.

use std::rc::Rc;

use rite_core::{BlockRef, Pool, SymId, SymbolTable};

use crate::error::LoadError;
use crate::load;
use crate::value::Value;

/// Size in bytes of one catch handler record in the image.
pub const CATCH_HANDLER_SIZE: usize = 13;

/// Literal pool entry tags in the image.
pub const POOL_TT_STR: u8 = 0;
pub const POOL_TT_INT32: u8 = 1;
pub const POOL_TT_SSTR: u8 = 2;
pub const POOL_TT_INT64: u8 = 3;
pub const POOL_TT_FLOAT: u8 = 5;

/// One catch handler: a bytecode range and the handler entry offset.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CatchHandler {
    pub kind: u8,
    pub begin: u32,
    pub end: u32,
    pub target: u32,
}

/// An immutable instruction record.
#[derive(Debug)]
pub struct Irep {
    pub nlocals: u16,
    pub nregs: u16,
    pub rlen: u16,
    pub clen: u16,
    pub ilen: u16,
    pub plen: u16,
    pub slen: u16,
    /// The image region this irep borrows from.
    buf: Rc<[u8]>,
    code_off: u32,
    catch_off: u32,
    pool_off: u32,
    /// Symbol-id table followed by pool-offset table, little-endian u16
    /// each. `None` when both tables are empty.
    block: Option<BlockRef>,
    children: Vec<Rc<Irep>>,
}

impl Irep {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        nlocals: u16,
        nregs: u16,
        clen: u16,
        ilen: u16,
        plen: u16,
        slen: u16,
        buf: Rc<[u8]>,
        code_off: u32,
        catch_off: u32,
        pool_off: u32,
        block: Option<BlockRef>,
        children: Vec<Rc<Irep>>,
    ) -> Irep {
        Irep {
            nlocals,
            nregs,
            rlen: children.len() as u16,
            clen,
            ilen,
            plen,
            slen,
            buf,
            code_off,
            catch_off,
            pool_off,
            block,
            children,
        }
    }

    /// The instruction bytes.
    pub fn code(&self) -> &[u8] {
        let start = self.code_off as usize;
        &self.buf[start..start + self.ilen as usize]
    }

    /// Child irep `i`.
    pub fn child(&self, i: usize) -> Option<&Rc<Irep>> {
        self.children.get(i)
    }

    /// Interned id of symbol slot `i`.
    pub fn sym(&self, pool: &Pool, i: usize) -> Option<SymId> {
        if i >= self.slen as usize {
            return None;
        }
        let bytes = pool.bytes(self.block?);
        let at = i * 2;
        Some(SymId::new(u16::from_le_bytes([bytes[at], bytes[at + 1]])))
    }

    /// Catch handler record `i`.
    pub fn catch_handler(&self, i: usize) -> Option<CatchHandler> {
        if i >= self.clen as usize {
            return None;
        }
        let at = self.catch_off as usize + i * CATCH_HANDLER_SIZE;
        let b = &self.buf[at..at + CATCH_HANDLER_SIZE];
        Some(CatchHandler {
            kind: b[0],
            begin: u32::from_be_bytes([b[1], b[2], b[3], b[4]]),
            end: u32::from_be_bytes([b[5], b[6], b[7], b[8]]),
            target: u32::from_be_bytes([b[9], b[10], b[11], b[12]]),
        })
    }

    /// Materialize literal pool entry `n`. O(1) through the offset table;
    /// strings come back as fresh payloads.
    pub fn pool_value(&self, pool: &Pool, n: usize) -> Option<Value> {
        if n >= self.plen as usize {
            return None;
        }
        let tables = pool.bytes(self.block?);
        let at = self.slen as usize * 2 + n * 2;
        let ofs = u16::from_le_bytes([tables[at], tables[at + 1]]) as usize;

        let p = self.pool_off as usize + ofs;
        let tag = self.buf[p];
        Some(match tag {
            POOL_TT_STR | POOL_TT_SSTR => {
                let len = u16::from_be_bytes([self.buf[p + 1], self.buf[p + 2]]) as usize;
                Value::string(&self.buf[p + 3..p + 3 + len])
            }
            POOL_TT_INT32 => {
                let raw = [self.buf[p + 1], self.buf[p + 2], self.buf[p + 3], self.buf[p + 4]];
                Value::Integer(i32::from_be_bytes(raw) as i64)
            }
            POOL_TT_INT64 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&self.buf[p + 1..p + 9]);
                Value::Integer(i64::from_be_bytes(raw))
            }
            POOL_TT_FLOAT => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&self.buf[p + 1..p + 9]);
                Value::Float(f64::from_be_bytes(raw))
            }
            // The loader refuses unknown tags; nothing else can be here.
            _ => return None,
        })
    }

    /// Return this irep's pool storage and that of every descendant.
    /// The irep must not be used afterwards; loaded trees go through
    /// [`Program::release`], synthesized frames call this directly.
    pub fn release(&self, pool: &mut Pool) {
        for child in &self.children {
            child.release(pool);
        }
        if let Some(block) = self.block {
            pool.free(block);
        }
    }
}

/// A loaded image: the root irep and the buffer the tree borrows from.
#[derive(Debug)]
pub struct Program {
    pub root: Rc<Irep>,
    buf: Rc<[u8]>,
}

impl Program {
    pub(crate) fn new(root: Rc<Irep>, buf: Rc<[u8]>) -> Program {
        Program { root, buf }
    }

    /// Bytes of the backing image.
    pub fn image(&self) -> &[u8] {
        &self.buf
    }

    /// Release the tree's pool storage. The pool returns to its pre-load
    /// usage, minus any symbols the load interned. Ireps still shared
    /// elsewhere must not be used afterwards.
    pub fn release(self, pool: &mut Pool) {
        self.root.release(pool);
    }
}

/// Builds irep records programmatically: the synthesized frames native
/// code runs through the stack-swap protocol, and test fixtures. The
/// built bytes go through the real loader, so there is exactly one
/// record parser.
#[derive(Default)]
pub struct IrepAssembler {
    pub nlocals: u16,
    pub nregs: u16,
    code: Vec<u8>,
    catches: Vec<CatchHandler>,
    pool: Vec<PoolEntry>,
    syms: Vec<String>,
    children: Vec<IrepAssembler>,
}

enum PoolEntry {
    Str(Vec<u8>),
    Int32(i32),
    Int64(i64),
    Float(f64),
}

impl IrepAssembler {
    pub fn new() -> Self {
        IrepAssembler {
            nregs: 8,
            ..IrepAssembler::default()
        }
    }

    /// Append raw instruction bytes.
    pub fn code(&mut self, bytes: &[u8]) -> &mut Self {
        self.code.extend_from_slice(bytes);
        self
    }

    /// Current end of the instruction stream, for computing jump offsets
    /// and catch ranges.
    pub fn here(&self) -> usize {
        self.code.len()
    }

    /// Intern a name into the record's symbol table, returning its slot.
    pub fn sym(&mut self, name: &str) -> u8 {
        if let Some(i) = self.syms.iter().position(|s| s == name) {
            return i as u8;
        }
        self.syms.push(name.to_string());
        (self.syms.len() - 1) as u8
    }

    /// Add a string literal, returning its pool slot.
    pub fn str_lit(&mut self, s: &str) -> u8 {
        self.pool.push(PoolEntry::Str(s.as_bytes().to_vec()));
        (self.pool.len() - 1) as u8
    }

    pub fn int32_lit(&mut self, v: i32) -> u8 {
        self.pool.push(PoolEntry::Int32(v));
        (self.pool.len() - 1) as u8
    }

    pub fn int64_lit(&mut self, v: i64) -> u8 {
        self.pool.push(PoolEntry::Int64(v));
        (self.pool.len() - 1) as u8
    }

    pub fn float_lit(&mut self, v: f64) -> u8 {
        self.pool.push(PoolEntry::Float(v));
        (self.pool.len() - 1) as u8
    }

    /// Add a catch handler covering `begin..=end` with its entry point.
    pub fn catch_handler(&mut self, begin: usize, end: usize, target: usize) -> &mut Self {
        self.catches.push(CatchHandler {
            kind: 0,
            begin: begin as u32,
            end: end as u32,
            target: target as u32,
        });
        self
    }

    /// Nest a child record, returning its slot.
    pub fn child(&mut self, child: IrepAssembler) -> u8 {
        self.children.push(child);
        (self.children.len() - 1) as u8
    }

    /// Serialize this record (and its children) in image layout.
    pub fn record(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.record_into(&mut out);
        out
    }

    fn record_into(&self, out: &mut Vec<u8>) {
        let start = out.len();
        out.extend_from_slice(&[0u8; 4]); // record size, patched below

        for v in [
            self.nlocals,
            self.nregs,
            self.children.len() as u16,
            self.catches.len() as u16,
            self.code.len() as u16,
        ] {
            out.extend_from_slice(&v.to_be_bytes());
        }
        out.extend_from_slice(&self.code);

        for c in &self.catches {
            out.push(c.kind);
            out.extend_from_slice(&c.begin.to_be_bytes());
            out.extend_from_slice(&c.end.to_be_bytes());
            out.extend_from_slice(&c.target.to_be_bytes());
        }

        out.extend_from_slice(&(self.pool.len() as u16).to_be_bytes());
        for entry in &self.pool {
            match entry {
                PoolEntry::Str(bytes) => {
                    out.push(POOL_TT_STR);
                    out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
                    out.extend_from_slice(bytes);
                    out.push(0);
                }
                PoolEntry::Int32(v) => {
                    out.push(POOL_TT_INT32);
                    out.extend_from_slice(&v.to_be_bytes());
                }
                PoolEntry::Int64(v) => {
                    out.push(POOL_TT_INT64);
                    out.extend_from_slice(&v.to_be_bytes());
                }
                PoolEntry::Float(v) => {
                    out.push(POOL_TT_FLOAT);
                    out.extend_from_slice(&v.to_be_bytes());
                }
            }
        }

        out.extend_from_slice(&(self.syms.len() as u16).to_be_bytes());
        for name in &self.syms {
            out.extend_from_slice(&(name.len() as u16).to_be_bytes());
            out.extend_from_slice(name.as_bytes());
            out.push(0);
        }

        let record_size = (out.len() - start) as u32;
        out[start..start + 4].copy_from_slice(&record_size.to_be_bytes());

        for child in &self.children {
            child.record_into(out);
        }
    }

    /// Wrap the record in a complete RITE02 image.
    pub fn to_rite(&self) -> Vec<u8> {
        let record = self.record();
        let mut out = Vec::new();
        out.extend_from_slice(b"RITE0200");
        out.extend_from_slice(&[0u8; 4]); // total size, patched below
        out.extend_from_slice(b"MATZ");
        out.extend_from_slice(b"0000");

        out.extend_from_slice(b"IREP");
        out.extend_from_slice(&((12 + record.len()) as u32).to_be_bytes());
        out.extend_from_slice(b"0300");
        out.extend_from_slice(&record);

        out.extend_from_slice(b"END\0");
        out.extend_from_slice(&8u32.to_be_bytes());

        let total = (out.len() as u32).to_be_bytes();
        out[8..12].copy_from_slice(&total);
        out
    }

    /// Build the record and parse it into a live irep.
    pub fn build(
        &self,
        pool: &mut Pool,
        symbols: &mut SymbolTable,
    ) -> Result<Rc<Irep>, LoadError> {
        let buf: Rc<[u8]> = self.record().into();
        let (irep, _) = load::parse_irep(&buf, 0, pool, symbols)?;
        Ok(irep)
    }
}
