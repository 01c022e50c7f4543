//! RITE02 instruction set.
//!
//! One byte of opcode followed by operands in the format noted per op:
//! `B` one byte, `S` a big-endian 16-bit value, `W` a big-endian 24-bit
//! value, `Z` nothing. Jump distances are signed 16-bit offsets relative
//! to the end of the jump instruction.

/// Opcode byte values.
pub mod op {
    pub const NOP: u8 = 0x00; // Z
    pub const MOVE: u8 = 0x01; // BB   R[a] = R[b]
    pub const LOADL: u8 = 0x02; // BB   R[a] = Pool[b]
    pub const LOADI: u8 = 0x03; // BB   R[a] = b
    pub const LOADINEG: u8 = 0x04; // BB   R[a] = -b
    pub const LOADINEG1: u8 = 0x05; // B    R[a] = -1
    pub const LOADI_0: u8 = 0x06; // B    R[a] = 0
    pub const LOADI_1: u8 = 0x07;
    pub const LOADI_2: u8 = 0x08;
    pub const LOADI_3: u8 = 0x09;
    pub const LOADI_4: u8 = 0x0a;
    pub const LOADI_5: u8 = 0x0b;
    pub const LOADI_6: u8 = 0x0c;
    pub const LOADI_7: u8 = 0x0d; // B    R[a] = 7
    pub const LOADI16: u8 = 0x0e; // BS   R[a] = sign-extended s
    pub const LOADI32: u8 = 0x0f; // BSS  R[a] = 32-bit value
    pub const LOADSYM: u8 = 0x10; // BB   R[a] = Syms[b]
    pub const LOADNIL: u8 = 0x11; // B
    pub const LOADSELF: u8 = 0x12; // B
    pub const LOADT: u8 = 0x13; // B
    pub const LOADF: u8 = 0x14; // B
    pub const GETGV: u8 = 0x15; // BB
    pub const SETGV: u8 = 0x16; // BB
    pub const GETSV: u8 = 0x17; // BB   (unsupported)
    pub const SETSV: u8 = 0x18; // BB   (unsupported)
    pub const GETIV: u8 = 0x19; // BB
    pub const SETIV: u8 = 0x1a; // BB
    pub const GETCV: u8 = 0x1b; // BB   (unsupported)
    pub const SETCV: u8 = 0x1c; // BB   (unsupported)
    pub const GETCONST: u8 = 0x1d; // BB
    pub const SETCONST: u8 = 0x1e; // BB
    pub const GETMCNST: u8 = 0x1f; // BB   (unsupported)
    pub const SETMCNST: u8 = 0x20; // BB   (unsupported)
    pub const GETUPVAR: u8 = 0x21; // BBB
    pub const SETUPVAR: u8 = 0x22; // BBB
    pub const GETIDX: u8 = 0x23; // B    (unsupported)
    pub const SETIDX: u8 = 0x24; // B    (unsupported)
    pub const JMP: u8 = 0x25; // S
    pub const JMPIF: u8 = 0x26; // BS
    pub const JMPNOT: u8 = 0x27; // BS
    pub const JMPNIL: u8 = 0x28; // BS
    pub const JMPUW: u8 = 0x29; // S
    pub const EXCEPT: u8 = 0x2a; // B    R[a] = pending exception
    pub const RESCUE: u8 = 0x2b; // BB   R[b] = R[a].kind_of?(R[b])
    pub const RAISEIF: u8 = 0x2c; // B    re-raise R[a] unless nil
    pub const SSEND: u8 = 0x2d; // BBB  R[a] = self; then SEND
    pub const SSENDB: u8 = 0x2e; // BBB
    pub const SEND: u8 = 0x2f; // BBB  R[a] = R[a].Syms[b](R[a+1]..argc c)
    pub const SENDB: u8 = 0x30; // BBB  block in R[a+c+1]
    pub const CALL: u8 = 0x31; // Z    (unsupported)
    pub const SUPER: u8 = 0x32; // BB   (unsupported)
    pub const ARGARY: u8 = 0x33; // BS   (unsupported)
    pub const ENTER: u8 = 0x34; // W    argument check
    pub const KEY_P: u8 = 0x35; // BB   (unsupported)
    pub const KEYEND: u8 = 0x36; // Z    (unsupported)
    pub const KARG: u8 = 0x37; // BB   (unsupported)
    pub const RETURN: u8 = 0x38; // B
    pub const RETURN_BLK: u8 = 0x39; // B
    pub const BREAK: u8 = 0x3a; // B    (unsupported)
    pub const BLKPUSH: u8 = 0x3b; // BS   (unsupported)
    pub const ADD: u8 = 0x3c; // B
    pub const ADDI: u8 = 0x3d; // BB
    pub const SUB: u8 = 0x3e; // B
    pub const SUBI: u8 = 0x3f; // BB
    pub const MUL: u8 = 0x40; // B
    pub const DIV: u8 = 0x41; // B
    pub const EQ: u8 = 0x42; // B
    pub const LT: u8 = 0x43; // B
    pub const LE: u8 = 0x44; // B
    pub const GT: u8 = 0x45; // B
    pub const GE: u8 = 0x46; // B
    pub const ARRAY: u8 = 0x47; // BB   R[a] = [R[a]..R[a+b-1]]
    pub const ARRAY2: u8 = 0x48; // BBB  R[a] = [R[b]..R[b+c-1]]
    pub const ARYCAT: u8 = 0x49; // B
    pub const ARYPUSH: u8 = 0x4a; // BB
    pub const ARYDUP: u8 = 0x4b; // B
    pub const AREF: u8 = 0x4c; // BBB  R[a] = R[b][c]
    pub const ASET: u8 = 0x4d; // BBB  R[b][c] = R[a]
    pub const APOST: u8 = 0x4e; // BBB  (unsupported)
    pub const INTERN: u8 = 0x4f; // B    (unsupported)
    pub const SYMBOL: u8 = 0x50; // BB   R[a] = intern(Pool[b])
    pub const STRING: u8 = 0x51; // BB   R[a] = dup(Pool[b])
    pub const STRCAT: u8 = 0x52; // B    R[a] << R[a+1]
    pub const HASH: u8 = 0x53; // BB   R[a] = {R[a]: R[a+1], ...} b pairs
    pub const HASHADD: u8 = 0x54; // BB
    pub const HASHCAT: u8 = 0x55; // B
    pub const LAMBDA: u8 = 0x56; // BB   R[a] = lambda(Irep[b])
    pub const BLOCK: u8 = 0x57; // BB
    pub const METHOD: u8 = 0x58; // BB
    pub const RANGE_INC: u8 = 0x59; // B    R[a] = R[a]..R[a+1]
    pub const RANGE_EXC: u8 = 0x5a; // B    R[a] = R[a]...R[a+1]
    pub const OCLASS: u8 = 0x5b; // B    R[a] = Object
    pub const CLASS: u8 = 0x5c; // BB   R[a] = class Syms[b] < R[a+1]
    pub const MODULE: u8 = 0x5d; // BB   (unsupported)
    pub const EXEC: u8 = 0x5e; // BB   run Irep[b] with R[a] as self
    pub const DEF: u8 = 0x5f; // BB   R[a].define_method(Syms[b], R[a+1])
    pub const ALIAS: u8 = 0x60; // BB   (unsupported)
    pub const UNDEF: u8 = 0x61; // B    (unsupported)
    pub const SCLASS: u8 = 0x62; // B    (unsupported)
    pub const TCLASS: u8 = 0x63; // B    R[a] = target class
    pub const DEBUG: u8 = 0x64; // BBB  (ignored)
    pub const ERR: u8 = 0x65; // B    raise LocalJumpError-ish
    pub const EXT1: u8 = 0x66; // Z    (unsupported)
    pub const EXT2: u8 = 0x67; // Z    (unsupported)
    pub const EXT3: u8 = 0x68; // Z    (unsupported)
    pub const STOP: u8 = 0x69; // Z    end of task
    /// Pseudo-op terminating a synthesized frame; never emitted by the
    /// compiler, only by native code re-entering the VM.
    pub const ABORT: u8 = 0x6a; // Z
}
