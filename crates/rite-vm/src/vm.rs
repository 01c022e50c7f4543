//! The register machine.
//!
//! One register file, a call-frame stack, and a byte-at-a-time dispatch
//! loop over the RITE02 instruction set subset. The machine owns the
//! pool, the interner and the class registry; everything is a plain
//! value so tests can build as many isolated machines as they like.
//!
//! Native code re-enters the interpreter only through the snapshot
//! protocol ([`Vm::call_irep`]): save the current irep, instruction
//! pointer and window base, install a synthesized frame, run to its
//! abort op, restore. The public entry [`Vm::execute`] refuses nested
//! entry outright.

use std::io::Write;
use std::rc::Rc;

use rite_core::{Pool, SymId, SymbolTable};

use crate::class::{builtin, ClassId, ClassRegistry, Method};
use crate::error::VmError;
use crate::irep::{Irep, Program};
use crate::kv::KvList;
use crate::opcode::op;
use crate::value::{compare, ProcKind, RException, RProc, RRange, Value};

/// Default register file size.
const DEFAULT_REGS: usize = 256;

/// Default symbol table capacity.
const DEFAULT_SYMBOLS: usize = 512;

/// Default pool size when the embedder does not pick one.
pub const DEFAULT_POOL_SIZE: usize = 256 * 1024;

/// Machine sizing knobs.
#[derive(Copy, Clone, Debug)]
pub struct VmConfig {
    pub pool_size: usize,
    pub regs_size: usize,
    pub max_symbols: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            pool_size: DEFAULT_POOL_SIZE,
            regs_size: DEFAULT_REGS,
            max_symbols: DEFAULT_SYMBOLS,
        }
    }
}

/// Why a run ended.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// The task ran to its stop op.
    Stop,
    /// A synthesized frame reached its abort op.
    Abort,
    /// An exception unwound every frame.
    Uncaught,
}

/// A raised, not yet rescued exception.
pub struct Raised {
    pub class: ClassId,
    pub message: Value,
}

/// Saved execution context for the re-entrant call protocol.
pub struct Snapshot {
    irep: Option<Rc<Irep>>,
    pc: usize,
    reg_base: usize,
    target_class: ClassId,
    floor: usize,
    last_send_sym: Option<SymId>,
}

struct CallInfo {
    irep: Rc<Irep>,
    pc: usize,
    reg_base: usize,
    #[allow(dead_code)]
    method_id: SymId,
    n_args: usize,
    target_class: ClassId,
}

enum Unwound {
    Handled,
    Ended(StopReason),
}

/// The virtual machine.
pub struct Vm {
    pub pool: Pool,
    pub symbols: SymbolTable,
    pub classes: ClassRegistry,
    globals: KvList,
    consts: KvList,
    regs: Vec<Value>,
    callinfo: Vec<CallInfo>,
    cur_irep: Option<Rc<Irep>>,
    pc: usize,
    reg_base: usize,
    target_class: ClassId,
    exc: Option<Raised>,
    fatal: Option<VmError>,
    /// Call frames below this index belong to an outer execution context
    /// and are off limits to return and unwind.
    floor: usize,
    last_send_sym: Option<SymId>,
    running: bool,
    out: Box<dyn Write>,
}

impl Vm {
    pub fn new(cfg: VmConfig) -> Self {
        let mut pool = Pool::new(cfg.pool_size.max(4096));
        let mut symbols = SymbolTable::new(cfg.max_symbols.max(64));
        let classes = ClassRegistry::bootstrap(&mut pool, &mut symbols);
        Vm {
            pool,
            symbols,
            classes,
            globals: KvList::new(),
            consts: KvList::new(),
            regs: vec![Value::Nil; cfg.regs_size.max(32)],
            callinfo: Vec::new(),
            cur_irep: None,
            pc: 0,
            reg_base: 0,
            target_class: builtin::OBJECT,
            exc: None,
            fatal: None,
            floor: 0,
            last_send_sym: None,
            running: false,
            out: Box::new(std::io::stdout()),
        }
    }

    /// Redirect `p`/`puts`/`print` and uncaught-exception reports.
    pub fn set_output(&mut self, out: Box<dyn Write>) {
        self.out = out;
    }

    // ------------------------------------------------------------------
    // Registers
    // ------------------------------------------------------------------

    pub fn reg(&self, i: usize) -> &Value {
        &self.regs[i]
    }

    pub fn set_reg(&mut self, i: usize, v: Value) {
        self.regs[i] = v;
    }

    pub fn take_reg(&mut self, i: usize) -> Value {
        Value::take(&mut self.regs[i])
    }

    pub fn regs_len(&self) -> usize {
        self.regs.len()
    }

    fn rget(&self, i: usize) -> Result<Value, VmError> {
        self.regs.get(i).cloned().ok_or(VmError::RegisterOverflow {
            needed: i + 1,
            have: self.regs.len(),
        })
    }

    fn rref(&self, i: usize) -> Result<&Value, VmError> {
        self.regs.get(i).ok_or(VmError::RegisterOverflow {
            needed: i + 1,
            have: self.regs.len(),
        })
    }

    fn rset(&mut self, i: usize, v: Value) -> Result<(), VmError> {
        let have = self.regs.len();
        match self.regs.get_mut(i) {
            Some(slot) => {
                *slot = v;
                Ok(())
            }
            None => Err(VmError::RegisterOverflow {
                needed: i + 1,
                have,
            }),
        }
    }

    fn rtake(&mut self, i: usize) -> Result<Value, VmError> {
        let have = self.regs.len();
        match self.regs.get_mut(i) {
            Some(slot) => Ok(Value::take(slot)),
            None => Err(VmError::RegisterOverflow {
                needed: i + 1,
                have,
            }),
        }
    }

    fn ensure_regs(&self, end: usize) -> Result<(), VmError> {
        if end > self.regs.len() {
            Err(VmError::RegisterOverflow {
                needed: end,
                have: self.regs.len(),
            })
        } else {
            Ok(())
        }
    }

    // ------------------------------------------------------------------
    // Symbols, names, exceptions
    // ------------------------------------------------------------------

    pub fn intern(&mut self, name: &str) -> Option<SymId> {
        self.symbols.intern(&mut self.pool, name)
    }

    pub fn sym_str(&self, id: SymId) -> &str {
        self.symbols.name(&self.pool, id).unwrap_or("")
    }

    pub fn sym_owned(&self, id: SymId) -> String {
        self.sym_str(id).to_string()
    }

    pub fn class_name(&self, id: ClassId) -> &str {
        self.sym_str(self.classes.get(id).sym_id)
    }

    fn class_name_owned(&self, id: ClassId) -> String {
        self.class_name(id).to_string()
    }

    /// Bind a native method, interning its name.
    pub fn define_native(&mut self, class: ClassId, name: &str, f: crate::class::NativeFn) {
        let sym = self
            .intern(name)
            .expect("symbol table too small for method registration");
        self.classes.define_method(class, sym, Method::Native(f));
    }

    /// Record a pending exception. The dispatch loop unwinds at the next
    /// instruction boundary.
    pub fn raise(&mut self, class: ClassId, message: Option<&str>) {
        let message = match message {
            Some(m) => Value::string(m),
            None => Value::Nil,
        };
        self.raise_value(class, message);
    }

    pub fn raise_value(&mut self, class: ClassId, message: Value) {
        self.exc = Some(Raised { class, message });
    }

    pub fn pending_exception(&self) -> Option<&Raised> {
        self.exc.as_ref()
    }

    pub fn clear_exception(&mut self) {
        self.exc = None;
    }

    /// Symbol of the most recent method dispatch; lets attribute shims
    /// recover the name they were invoked under.
    pub fn last_callee(&self) -> Option<SymId> {
        self.last_send_sym
    }

    /// Window base and argc of the innermost script frame.
    pub fn frame_info(&self) -> Option<(usize, usize)> {
        self.callinfo.last().map(|ci| (self.reg_base, ci.n_args))
    }

    pub fn global_get(&self, sym: SymId) -> Value {
        self.globals.get_sym(sym).cloned().unwrap_or(Value::Nil)
    }

    pub fn global_set(&mut self, sym: SymId, v: Value) {
        self.globals.set_sym(sym, v);
    }

    pub fn const_get(&self, sym: SymId) -> Value {
        self.consts.get_sym(sym).cloned().unwrap_or(Value::Nil)
    }

    pub fn const_set(&mut self, sym: SymId, v: Value) {
        self.consts.set_sym(sym, v);
    }

    // ------------------------------------------------------------------
    // Output
    // ------------------------------------------------------------------

    pub fn out_write(&mut self, bytes: &[u8]) {
        let _ = self.out.write_all(bytes);
    }

    /// `print` semantics: strings go out raw, everything else in display
    /// form.
    pub fn print_value(&mut self, v: &Value) {
        if let Value::String(s) = v {
            let bytes = s.borrow().bytes.clone();
            self.out_write(&bytes);
        } else {
            let text = self.display_string(v);
            self.out_write(text.as_bytes());
        }
    }

    /// `puts` semantics. Returns true when output already ended in a
    /// newline (so the caller must not add another). Arrays print one
    /// element per line.
    pub fn puts_value(&mut self, v: &Value) -> bool {
        match v {
            Value::Array(elems) => {
                let elems = elems.borrow().clone();
                for e in &elems {
                    if !self.puts_value(e) {
                        self.out_write(b"\n");
                    }
                }
                true
            }
            Value::String(s) => {
                let bytes = s.borrow().bytes.clone();
                self.out_write(&bytes);
                bytes.ends_with(b"\n")
            }
            Value::Nil => false,
            _ => {
                let text = self.display_string(v);
                self.out_write(text.as_bytes());
                false
            }
        }
    }

    /// `p` semantics: inspect form, one value per line.
    pub fn p_value(&mut self, v: &Value) {
        let text = self.inspect_string(v);
        self.out_write(text.as_bytes());
        self.out_write(b"\n");
    }

    /// The value in `to_s` form.
    pub fn display_string(&self, v: &Value) -> String {
        match v {
            Value::Empty | Value::Nil => String::new(),
            Value::False => "false".to_string(),
            Value::True => "true".to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => format!("{f}"),
            Value::Symbol(s) => self.sym_owned(*s),
            Value::Class(c) => self.class_name_owned(*c),
            Value::String(s) => String::from_utf8_lossy(&s.borrow().bytes).into_owned(),
            Value::Object(o) => {
                let cls = o.borrow().class;
                format!(
                    "#<{}:{:08x}>",
                    self.class_name(cls),
                    Rc::as_ptr(o) as usize & 0xffff_ffff
                )
            }
            Value::Proc(p) => {
                format!("#<Proc:{:08x}>", Rc::as_ptr(p) as usize & 0xffff_ffff)
            }
            Value::Array(_) | Value::Hash(_) => self.inspect_string(v),
            Value::Range(r) => {
                let dots = if r.exclusive { "..." } else { ".." };
                format!(
                    "{}{dots}{}",
                    self.display_string(&r.first),
                    self.display_string(&r.last)
                )
            }
            Value::Exception(e) => {
                let name = self.class_name_owned(e.class);
                match &e.message {
                    Value::Nil => name,
                    m => format!("{name}: {}", self.display_string(m)),
                }
            }
            Value::Handle(_) => "#<Handle>".to_string(),
        }
    }

    /// The value in `inspect` form.
    pub fn inspect_string(&self, v: &Value) -> String {
        match v {
            Value::Nil => "nil".to_string(),
            Value::Symbol(s) => format!(":{}", self.sym_str(*s)),
            Value::String(s) => {
                let mut out = String::from("\"");
                for &b in &s.borrow().bytes {
                    match b {
                        b'"' => out.push_str("\\\""),
                        b'\\' => out.push_str("\\\\"),
                        b'\n' => out.push_str("\\n"),
                        b'\t' => out.push_str("\\t"),
                        b'\r' => out.push_str("\\r"),
                        0x20..=0x7e => out.push(b as char),
                        _ => out.push_str(&format!("\\x{b:02X}")),
                    }
                }
                out.push('"');
                out
            }
            Value::Array(elems) => {
                let elems = elems.borrow();
                let inner: Vec<String> = elems.iter().map(|e| self.inspect_string(e)).collect();
                format!("[{}]", inner.join(", "))
            }
            Value::Hash(kv) => {
                let kv = kv.borrow();
                let inner: Vec<String> = kv
                    .iter()
                    .map(|(k, v)| format!("{}=>{}", self.inspect_string(k), self.inspect_string(v)))
                    .collect();
                format!("{{{}}}", inner.join(", "))
            }
            _ => self.display_string(v),
        }
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Run a loaded program to completion. Refuses re-entry: native code
    /// that needs to run script must use [`Vm::call_irep`].
    pub fn execute(&mut self, prog: &Program) -> Result<StopReason, VmError> {
        if self.running {
            return Err(VmError::NestedEntry);
        }
        self.ensure_regs(prog.root.nregs as usize)?;
        self.running = true;
        self.cur_irep = Some(Rc::clone(&prog.root));
        self.pc = 0;
        self.reg_base = 0;
        self.floor = 0;
        self.exc = None;
        self.target_class = builtin::OBJECT;
        self.regs[0] = Value::Class(builtin::OBJECT);

        let result = self.run();
        self.running = false;
        self.cur_irep = None;
        result
    }

    /// The re-entrant call protocol: snapshot the execution context, run
    /// `irep` with its window at `base`, restore. A pending exception
    /// survives the restore and unwinds in the outer frames.
    pub fn call_irep(&mut self, irep: Rc<Irep>, base: usize) {
        if let Err(e) = self.ensure_regs(base + irep.nregs as usize) {
            self.fatal = Some(e);
            return;
        }
        let snap = self.snapshot();
        self.cur_irep = Some(irep);
        self.pc = 0;
        self.reg_base = base;
        self.floor = self.callinfo.len();
        if let Err(e) = self.run() {
            self.fatal = Some(e);
        }
        self.restore(snap);
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            irep: self.cur_irep.clone(),
            pc: self.pc,
            reg_base: self.reg_base,
            target_class: self.target_class,
            floor: self.floor,
            last_send_sym: self.last_send_sym,
        }
    }

    pub fn restore(&mut self, snap: Snapshot) {
        self.cur_irep = snap.irep;
        self.pc = snap.pc;
        self.reg_base = snap.reg_base;
        self.target_class = snap.target_class;
        self.floor = snap.floor;
        self.last_send_sym = snap.last_send_sym;
    }

    /// Enter a script frame from native code (the `Proc#call` path): the
    /// current location becomes the return address and the dispatch loop
    /// continues inside `irep`.
    pub fn enter_frame(
        &mut self,
        irep: Rc<Irep>,
        base: usize,
        method: SymId,
        argc: usize,
    ) -> Result<(), VmError> {
        self.ensure_regs(base + irep.nregs as usize)?;
        let cur = match &self.cur_irep {
            Some(i) => Rc::clone(i),
            None => return Err(VmError::NestedEntry),
        };
        self.callinfo.push(CallInfo {
            irep: cur,
            pc: self.pc,
            reg_base: self.reg_base,
            method_id: method,
            n_args: argc,
            target_class: self.target_class,
        });
        self.cur_irep = Some(irep);
        self.reg_base = base;
        self.pc = 0;
        Ok(())
    }

    /// Dispatch a method by name against the receiver at `abs_base`,
    /// arguments following. Native bodies run to completion; script
    /// bodies enter a frame. Missing methods raise.
    fn send_sym(&mut self, abs_base: usize, sym: SymId, argc: usize) -> Result<(), VmError> {
        self.last_send_sym = Some(sym);
        let recv = self.rget(abs_base)?;
        let cls = self.classes.class_of(&recv);
        match self.classes.find_method(cls, sym) {
            None => {
                let msg = format!(
                    "undefined method '{}' for {}",
                    self.sym_owned(sym),
                    self.class_name_owned(cls)
                );
                self.raise(builtin::RUNTIME_ERROR, Some(&msg));
                Ok(())
            }
            Some((Method::Native(f), _)) => {
                f(self, abs_base, argc);
                Ok(())
            }
            Some((Method::Script(m), owner)) => {
                self.ensure_regs(abs_base + m.nregs as usize)?;
                let cur = match &self.cur_irep {
                    Some(i) => Rc::clone(i),
                    None => return Err(VmError::NestedEntry),
                };
                self.callinfo.push(CallInfo {
                    irep: cur,
                    pc: self.pc,
                    reg_base: self.reg_base,
                    method_id: sym,
                    n_args: argc,
                    target_class: self.target_class,
                });
                self.cur_irep = Some(m);
                self.reg_base = abs_base;
                self.pc = 0;
                self.target_class = owner;
                Ok(())
            }
        }
    }

    fn send_by_name(&mut self, abs_base: usize, name: &str, argc: usize) -> Result<(), VmError> {
        match self.intern(name) {
            Some(sym) => self.send_sym(abs_base, sym, argc),
            None => {
                self.raise(builtin::NO_MEMORY_ERROR, None);
                Ok(())
            }
        }
    }

    /// Pop a frame, writing the return value into the window base (which
    /// is the caller's receiver slot). Returns false at the entry frame.
    fn pop_frame(&mut self, ret: Value, nregs: usize) -> Result<bool, VmError> {
        for i in 1..nregs {
            if self.reg_base + i < self.regs.len() {
                let _ = self.rtake(self.reg_base + i);
            }
        }
        self.rset(self.reg_base, ret)?;
        if self.callinfo.len() > self.floor {
            if let Some(ci) = self.callinfo.pop() {
                self.cur_irep = Some(ci.irep);
                self.pc = ci.pc;
                self.reg_base = ci.reg_base;
                self.target_class = ci.target_class;
            }
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Walk catch handlers innermost-first across the active frames of
    /// this execution context; unhandled exceptions end it.
    fn unwind(&mut self) -> Result<Unwound, VmError> {
        loop {
            let irep = match &self.cur_irep {
                Some(i) => Rc::clone(i),
                None => return Ok(Unwound::Ended(StopReason::Uncaught)),
            };
            let pc = self.pc as u32;
            let mut target = None;
            for i in (0..irep.clen as usize).rev() {
                let h = irep.catch_handler(i).ok_or(VmError::BadSlot)?;
                if h.begin < pc && pc <= h.end {
                    target = Some(h.target as usize);
                    break;
                }
            }
            if let Some(t) = target {
                // The handler bytecode takes over; it reads the pending
                // exception with EXCEPT and rematches with RESCUE.
                self.pc = t;
                return Ok(Unwound::Handled);
            }

            if self.callinfo.len() > self.floor {
                let nregs = irep.nregs as usize;
                self.pop_frame(Value::Nil, nregs)?;
                continue;
            }

            // Unhandled within this execution context.
            if self.floor == 0 {
                if let Some(raised) = self.exc.take() {
                    let text = match &raised.message {
                        Value::Nil => self.class_name_owned(raised.class),
                        m => format!(
                            "{}: {}",
                            self.class_name_owned(raised.class),
                            self.display_string(m)
                        ),
                    };
                    self.out_write(text.as_bytes());
                    self.out_write(b"\n");
                }
            }
            // Nested contexts leave the exception pending for the outer
            // frames to unwind after the restore.
            return Ok(Unwound::Ended(StopReason::Uncaught));
        }
    }

    fn run(&mut self) -> Result<StopReason, VmError> {
        loop {
            if let Some(e) = self.fatal.take() {
                return Err(e);
            }
            if self.exc.is_some() {
                match self.unwind()? {
                    Unwound::Handled => {}
                    Unwound::Ended(reason) => return Ok(reason),
                }
                continue;
            }

            let irep = match &self.cur_irep {
                Some(i) => Rc::clone(i),
                None => return Ok(StopReason::Stop),
            };
            let code = irep.code();
            let opcode = fetch(code, self.pc)?;
            let mut pc = self.pc + 1;
            let base = self.reg_base;

            match opcode {
                op::NOP => {
                    self.pc = pc;
                }

                op::MOVE => {
                    let (a, b) = fetch_bb(code, &mut pc)?;
                    self.pc = pc;
                    let v = self.rget(base + b)?;
                    self.rset(base + a, v)?;
                }

                op::LOADL => {
                    let (a, b) = fetch_bb(code, &mut pc)?;
                    self.pc = pc;
                    let v = irep.pool_value(&self.pool, b).ok_or(VmError::BadSlot)?;
                    self.rset(base + a, v)?;
                }

                op::LOADI => {
                    let (a, b) = fetch_bb(code, &mut pc)?;
                    self.pc = pc;
                    self.rset(base + a, Value::Integer(b as i64))?;
                }

                op::LOADINEG => {
                    let (a, b) = fetch_bb(code, &mut pc)?;
                    self.pc = pc;
                    self.rset(base + a, Value::Integer(-(b as i64)))?;
                }

                op::LOADINEG1..=op::LOADI_7 => {
                    let a = fetch(code, pc)? as usize;
                    pc += 1;
                    self.pc = pc;
                    let v = opcode as i64 - op::LOADI_0 as i64;
                    self.rset(base + a, Value::Integer(v))?;
                }

                op::LOADI16 => {
                    let a = fetch(code, pc)? as usize;
                    let s = fetch2(code, pc + 1)? as i16;
                    pc += 3;
                    self.pc = pc;
                    self.rset(base + a, Value::Integer(s as i64))?;
                }

                op::LOADI32 => {
                    let a = fetch(code, pc)? as usize;
                    let hi = fetch2(code, pc + 1)? as u32;
                    let lo = fetch2(code, pc + 3)? as u32;
                    pc += 5;
                    self.pc = pc;
                    let v = ((hi << 16) | lo) as i32;
                    self.rset(base + a, Value::Integer(v as i64))?;
                }

                op::LOADSYM => {
                    let (a, b) = fetch_bb(code, &mut pc)?;
                    self.pc = pc;
                    let sym = irep.sym(&self.pool, b).ok_or(VmError::BadSlot)?;
                    self.rset(base + a, Value::Symbol(sym))?;
                }

                op::LOADNIL => {
                    let a = fetch(code, pc)? as usize;
                    pc += 1;
                    self.pc = pc;
                    self.rset(base + a, Value::Nil)?;
                }

                op::LOADSELF => {
                    let a = fetch(code, pc)? as usize;
                    pc += 1;
                    self.pc = pc;
                    let v = self.rget(base)?;
                    self.rset(base + a, v)?;
                }

                op::LOADT => {
                    let a = fetch(code, pc)? as usize;
                    pc += 1;
                    self.pc = pc;
                    self.rset(base + a, Value::True)?;
                }

                op::LOADF => {
                    let a = fetch(code, pc)? as usize;
                    pc += 1;
                    self.pc = pc;
                    self.rset(base + a, Value::False)?;
                }

                op::GETGV => {
                    let (a, b) = fetch_bb(code, &mut pc)?;
                    self.pc = pc;
                    let sym = irep.sym(&self.pool, b).ok_or(VmError::BadSlot)?;
                    let v = self.global_get(sym);
                    self.rset(base + a, v)?;
                }

                op::SETGV => {
                    let (a, b) = fetch_bb(code, &mut pc)?;
                    self.pc = pc;
                    let sym = irep.sym(&self.pool, b).ok_or(VmError::BadSlot)?;
                    let v = self.rget(base + a)?;
                    self.global_set(sym, v);
                }

                op::GETIV => {
                    let (a, b) = fetch_bb(code, &mut pc)?;
                    self.pc = pc;
                    let sym = irep.sym(&self.pool, b).ok_or(VmError::BadSlot)?;
                    let v = self.ivar_get(base, sym)?;
                    self.rset(base + a, v)?;
                }

                op::SETIV => {
                    let (a, b) = fetch_bb(code, &mut pc)?;
                    self.pc = pc;
                    let sym = irep.sym(&self.pool, b).ok_or(VmError::BadSlot)?;
                    let v = self.rget(base + a)?;
                    self.ivar_set(base, sym, v)?;
                }

                op::GETCONST => {
                    let (a, b) = fetch_bb(code, &mut pc)?;
                    self.pc = pc;
                    let sym = irep.sym(&self.pool, b).ok_or(VmError::BadSlot)?;
                    // Class names resolve through the registry first.
                    let v = match self.classes.find_class(sym) {
                        Some(id) => Value::Class(id),
                        None => self.const_get(sym),
                    };
                    self.rset(base + a, v)?;
                }

                op::SETCONST => {
                    let (a, b) = fetch_bb(code, &mut pc)?;
                    self.pc = pc;
                    let sym = irep.sym(&self.pool, b).ok_or(VmError::BadSlot)?;
                    let v = self.rget(base + a)?;
                    self.const_set(sym, v);
                }

                op::GETUPVAR => {
                    let (a, b, c) = fetch_bbb(code, &mut pc)?;
                    self.pc = pc;
                    let v = match self.upvar_base(base, c) {
                        Some(up) => self.rget(up + b)?,
                        None => Value::Nil,
                    };
                    self.rset(base + a, v)?;
                }

                op::SETUPVAR => {
                    let (a, b, c) = fetch_bbb(code, &mut pc)?;
                    self.pc = pc;
                    if let Some(up) = self.upvar_base(base, c) {
                        let v = self.rget(base + a)?;
                        self.rset(up + b, v)?;
                    }
                }

                op::JMP => {
                    let s = fetch2(code, pc)? as i16;
                    pc += 2;
                    self.pc = jump(pc, s)?;
                }

                op::JMPIF | op::JMPNOT | op::JMPNIL => {
                    let a = fetch(code, pc)? as usize;
                    let s = fetch2(code, pc + 1)? as i16;
                    pc += 3;
                    let v = self.rref(base + a)?;
                    let jumps = match opcode {
                        op::JMPIF => v.is_truthy(),
                        op::JMPNOT => !v.is_truthy(),
                        _ => v.is_nil(),
                    };
                    self.pc = if jumps { jump(pc, s)? } else { pc };
                }

                op::JMPUW => {
                    let s = fetch2(code, pc)? as i16;
                    pc += 2;
                    self.pc = jump(pc, s)?;
                }

                op::EXCEPT => {
                    let a = fetch(code, pc)? as usize;
                    pc += 1;
                    self.pc = pc;
                    let v = match self.exc.take() {
                        Some(raised) => Value::Exception(Rc::new(RException {
                            class: raised.class,
                            message: raised.message,
                        })),
                        None => Value::Nil,
                    };
                    self.rset(base + a, v)?;
                }

                op::RESCUE => {
                    let (a, b) = fetch_bb(code, &mut pc)?;
                    self.pc = pc;
                    let e = self.rget(base + a)?;
                    let cls = self.rget(base + b)?;
                    let matched = match (&e, &cls) {
                        (Value::Exception(exc), Value::Class(c)) => {
                            self.classes.is_ancestor(exc.class, *c)
                        }
                        _ => false,
                    };
                    self.rset(base + b, if matched { Value::True } else { Value::False })?;
                }

                op::RAISEIF => {
                    let a = fetch(code, pc)? as usize;
                    pc += 1;
                    self.pc = pc;
                    let v = self.rget(base + a)?;
                    match v {
                        Value::Nil | Value::Empty | Value::False => {}
                        Value::Exception(e) => {
                            self.raise_value(e.class, e.message.clone());
                        }
                        _ => {
                            self.raise(builtin::TYPE_ERROR, Some("exception object expected"));
                        }
                    }
                }

                op::SSEND | op::SSENDB | op::SEND | op::SENDB => {
                    let (a, b, c) = fetch_bbb(code, &mut pc)?;
                    self.pc = pc;
                    if opcode == op::SSEND || opcode == op::SSENDB {
                        let slf = self.rget(base)?;
                        self.rset(base + a, slf)?;
                    }
                    self.ensure_regs(base + a + c + 2)?;
                    if opcode == op::SEND || opcode == op::SSEND {
                        // No block given: clear any stale value in the
                        // block slot.
                        self.rset(base + a + c + 1, Value::Nil)?;
                    }
                    let sym = irep.sym(&self.pool, b).ok_or(VmError::BadSlot)?;
                    self.send_sym(base + a, sym, c)?;
                }

                op::ENTER => {
                    let x = fetch3(code, pc)?;
                    pc += 3;
                    let m1 = ((x >> 18) & 0x1f) as usize;
                    let o = ((x >> 13) & 0x1f) as usize;
                    let r = ((x >> 12) & 1) as usize;
                    let argc = self.callinfo.last().map(|ci| ci.n_args).unwrap_or(0);

                    if argc < m1 || (r == 0 && argc > m1 + o) {
                        self.pc = pc;
                        self.raise(
                            builtin::ARGUMENT_ERROR,
                            Some("wrong number of arguments"),
                        );
                    } else {
                        let supplied = (argc - m1).min(o);
                        let block_src = base + 1 + argc;
                        let block_dst = base + 1 + m1 + o + r;
                        if r == 1 {
                            let first_rest = base + 1 + m1 + o;
                            let mut rest = Vec::new();
                            for i in first_rest..block_src {
                                rest.push(self.rtake(i)?);
                            }
                            let blk = self.rtake(block_src)?;
                            self.rset(first_rest, Value::array(rest))?;
                            self.rset(block_dst, blk)?;
                        } else if argc != m1 + o {
                            let blk = self.rtake(block_src)?;
                            self.rset(block_dst, blk)?;
                        }
                        // Skip the jump-table slots of optionals that
                        // were supplied by the caller.
                        self.pc = pc + supplied * 3;
                    }
                }

                op::RETURN | op::RETURN_BLK => {
                    let a = fetch(code, pc)? as usize;
                    pc += 1;
                    self.pc = pc;
                    let v = self.rtake(base + a)?;
                    if !self.pop_frame(v, irep.nregs as usize)? {
                        return Ok(StopReason::Stop);
                    }
                }

                op::ADD | op::SUB | op::MUL | op::DIV => {
                    let a = fetch(code, pc)? as usize;
                    pc += 1;
                    self.pc = pc;
                    self.arith(base + a, opcode)?;
                }

                op::ADDI | op::SUBI => {
                    let (a, b) = fetch_bb(code, &mut pc)?;
                    self.pc = pc;
                    let n = b as i64;
                    let n = if opcode == op::SUBI { -n } else { n };
                    match self.rget(base + a)? {
                        Value::Integer(i) => {
                            self.rset(base + a, Value::Integer(i.wrapping_add(n)))?
                        }
                        Value::Float(f) => self.rset(base + a, Value::Float(f + n as f64))?,
                        other => {
                            let msg =
                                format!("{} cannot be offset by an integer", other.type_name());
                            self.raise(builtin::TYPE_ERROR, Some(&msg));
                        }
                    }
                }

                op::EQ => {
                    let a = fetch(code, pc)? as usize;
                    pc += 1;
                    self.pc = pc;
                    let x = self.rget(base + a)?;
                    let y = self.rget(base + a + 1)?;
                    let eq = x.eq_value(&y);
                    self.rset(base + a, if eq { Value::True } else { Value::False })?;
                }

                op::LT | op::LE | op::GT | op::GE => {
                    let a = fetch(code, pc)? as usize;
                    pc += 1;
                    self.pc = pc;
                    let x = self.rget(base + a)?;
                    let y = self.rget(base + a + 1)?;
                    match compare(&x, &y) {
                        Some(c) => {
                            let truth = match opcode {
                                op::LT => c < 0,
                                op::LE => c <= 0,
                                op::GT => c > 0,
                                _ => c >= 0,
                            };
                            self.rset(base + a, if truth { Value::True } else { Value::False })?;
                        }
                        None => {
                            let msg = format!(
                                "comparison of {} with {} failed",
                                x.type_name(),
                                y.type_name()
                            );
                            self.raise(builtin::TYPE_ERROR, Some(&msg));
                        }
                    }
                }

                op::ARRAY => {
                    let (a, b) = fetch_bb(code, &mut pc)?;
                    self.pc = pc;
                    let mut elems = Vec::with_capacity(b);
                    for i in 0..b {
                        elems.push(self.rtake(base + a + i)?);
                    }
                    self.rset(base + a, Value::array(elems))?;
                }

                op::ARRAY2 => {
                    let (a, b, c) = fetch_bbb(code, &mut pc)?;
                    self.pc = pc;
                    let mut elems = Vec::with_capacity(c);
                    for i in 0..c {
                        elems.push(self.rget(base + b + i)?);
                    }
                    self.rset(base + a, Value::array(elems))?;
                }

                op::ARYCAT => {
                    let a = fetch(code, pc)? as usize;
                    pc += 1;
                    self.pc = pc;
                    let dst = self.rget(base + a)?;
                    let src = self.rget(base + a + 1)?;
                    match (&dst, &src) {
                        (Value::Array(d), Value::Array(s)) => {
                            let extra = s.borrow().clone();
                            d.borrow_mut().extend(extra);
                        }
                        _ => self.raise(builtin::TYPE_ERROR, Some("array expected")),
                    }
                }

                op::ARYPUSH => {
                    let (a, b) = fetch_bb(code, &mut pc)?;
                    self.pc = pc;
                    let dst = self.rget(base + a)?;
                    match &dst {
                        Value::Array(d) => {
                            for i in 0..b {
                                let v = self.rtake(base + a + 1 + i)?;
                                d.borrow_mut().push(v);
                            }
                        }
                        _ => self.raise(builtin::TYPE_ERROR, Some("array expected")),
                    }
                }

                op::ARYDUP => {
                    let a = fetch(code, pc)? as usize;
                    pc += 1;
                    self.pc = pc;
                    let v = self.rget(base + a)?;
                    match &v {
                        Value::Array(elems) => {
                            let copy = elems.borrow().clone();
                            self.rset(base + a, Value::array(copy))?;
                        }
                        _ => self.raise(builtin::TYPE_ERROR, Some("array expected")),
                    }
                }

                op::AREF => {
                    let (a, b, c) = fetch_bbb(code, &mut pc)?;
                    self.pc = pc;
                    let v = self.rget(base + b)?;
                    let out = match &v {
                        Value::Array(elems) => {
                            elems.borrow().get(c).cloned().unwrap_or(Value::Nil)
                        }
                        _ if c == 0 => v.clone(),
                        _ => Value::Nil,
                    };
                    self.rset(base + a, out)?;
                }

                op::ASET => {
                    let (a, b, c) = fetch_bbb(code, &mut pc)?;
                    self.pc = pc;
                    let dst = self.rget(base + b)?;
                    let v = self.rget(base + a)?;
                    match &dst {
                        Value::Array(elems) => {
                            let mut elems = elems.borrow_mut();
                            if elems.len() <= c {
                                elems.resize(c + 1, Value::Nil);
                            }
                            elems[c] = v;
                        }
                        _ => self.raise(builtin::TYPE_ERROR, Some("array expected")),
                    }
                }

                op::SYMBOL => {
                    let (a, b) = fetch_bb(code, &mut pc)?;
                    self.pc = pc;
                    let v = irep.pool_value(&self.pool, b).ok_or(VmError::BadSlot)?;
                    match &v {
                        Value::String(s) => {
                            let name = String::from_utf8_lossy(&s.borrow().bytes).into_owned();
                            match self.intern(&name) {
                                Some(sym) => self.rset(base + a, Value::Symbol(sym))?,
                                None => self.raise(builtin::NO_MEMORY_ERROR, None),
                            }
                        }
                        _ => return Err(VmError::BadSlot),
                    }
                }

                op::STRING => {
                    let (a, b) = fetch_bb(code, &mut pc)?;
                    self.pc = pc;
                    let v = irep.pool_value(&self.pool, b).ok_or(VmError::BadSlot)?;
                    match v {
                        Value::String(_) => self.rset(base + a, v)?,
                        _ => return Err(VmError::BadSlot),
                    }
                }

                op::STRCAT => {
                    let a = fetch(code, pc)? as usize;
                    pc += 1;
                    self.pc = pc;
                    let dst = self.rget(base + a)?;
                    let src = self.rget(base + a + 1)?;
                    match &dst {
                        Value::String(d) => {
                            match &src {
                                Value::String(s) => {
                                    let extra = s.borrow().bytes.clone();
                                    d.borrow_mut().bytes.extend_from_slice(&extra);
                                }
                                other => {
                                    let text = self.display_string(other);
                                    d.borrow_mut().bytes.extend_from_slice(text.as_bytes());
                                }
                            }
                            let _ = self.rtake(base + a + 1);
                        }
                        _ => self.raise(builtin::TYPE_ERROR, Some("string expected")),
                    }
                }

                op::HASH => {
                    let (a, b) = fetch_bb(code, &mut pc)?;
                    self.pc = pc;
                    let mut kv = KvList::new();
                    for i in 0..b {
                        let k = self.rtake(base + a + i * 2)?;
                        let v = self.rtake(base + a + i * 2 + 1)?;
                        kv.set(k, v);
                    }
                    self.rset(base + a, Value::hash(kv))?;
                }

                op::HASHADD => {
                    let (a, b) = fetch_bb(code, &mut pc)?;
                    self.pc = pc;
                    let dst = self.rget(base + a)?;
                    match &dst {
                        Value::Hash(h) => {
                            for i in 0..b {
                                let k = self.rtake(base + a + 1 + i * 2)?;
                                let v = self.rtake(base + a + 2 + i * 2)?;
                                h.borrow_mut().set(k, v);
                            }
                        }
                        _ => self.raise(builtin::TYPE_ERROR, Some("hash expected")),
                    }
                }

                op::HASHCAT => {
                    let a = fetch(code, pc)? as usize;
                    pc += 1;
                    self.pc = pc;
                    let dst = self.rget(base + a)?;
                    let src = self.rget(base + a + 1)?;
                    match (&dst, &src) {
                        (Value::Hash(d), Value::Hash(s)) => {
                            let pairs: Vec<(Value, Value)> =
                                s.borrow().iter().cloned().collect();
                            for (k, v) in pairs {
                                d.borrow_mut().set(k, v);
                            }
                        }
                        _ => self.raise(builtin::TYPE_ERROR, Some("hash expected")),
                    }
                }

                op::LAMBDA | op::BLOCK | op::METHOD => {
                    let (a, b) = fetch_bb(code, &mut pc)?;
                    self.pc = pc;
                    let child = irep.child(b).cloned().ok_or(VmError::BadSlot)?;
                    let kind = match opcode {
                        op::LAMBDA => ProcKind::Lambda,
                        op::BLOCK => ProcKind::Block,
                        _ => ProcKind::Method,
                    };
                    let proc = RProc {
                        irep: child,
                        kind,
                        captured_base: base,
                    };
                    self.rset(base + a, Value::Proc(Rc::new(proc)))?;
                }

                op::RANGE_INC | op::RANGE_EXC => {
                    let a = fetch(code, pc)? as usize;
                    pc += 1;
                    self.pc = pc;
                    let first = self.rtake(base + a)?;
                    let last = self.rtake(base + a + 1)?;
                    let range = RRange {
                        first,
                        last,
                        exclusive: opcode == op::RANGE_EXC,
                    };
                    self.rset(base + a, Value::Range(Rc::new(range)))?;
                }

                op::OCLASS => {
                    let a = fetch(code, pc)? as usize;
                    pc += 1;
                    self.pc = pc;
                    self.rset(base + a, Value::Class(builtin::OBJECT))?;
                }

                op::CLASS => {
                    let (a, b) = fetch_bb(code, &mut pc)?;
                    self.pc = pc;
                    let sym = irep.sym(&self.pool, b).ok_or(VmError::BadSlot)?;
                    let sup = match self.rget(base + a + 1)? {
                        Value::Class(c) => c,
                        _ => builtin::OBJECT,
                    };
                    let id = self.classes.define_class(sym, sup);
                    self.rset(base + a, Value::Class(id))?;
                }

                op::EXEC => {
                    let (a, b) = fetch_bb(code, &mut pc)?;
                    self.pc = pc;
                    let child = irep.child(b).cloned().ok_or(VmError::BadSlot)?;
                    let slf = self.rget(base + a)?;
                    let cls = match &slf {
                        Value::Class(c) => *c,
                        _ => self.target_class,
                    };
                    let name = self.classes.get(cls).sym_id;
                    self.enter_frame(child, base + a, name, 0)?;
                    self.target_class = cls;
                }

                op::DEF => {
                    let (a, b) = fetch_bb(code, &mut pc)?;
                    self.pc = pc;
                    let sym = irep.sym(&self.pool, b).ok_or(VmError::BadSlot)?;
                    let cls = self.rget(base + a)?;
                    let body = self.rget(base + a + 1)?;
                    match (&cls, &body) {
                        (Value::Class(c), Value::Proc(p)) => {
                            self.classes
                                .define_method(*c, sym, Method::Script(Rc::clone(&p.irep)));
                            self.rset(base + a, Value::Symbol(sym))?;
                        }
                        _ => self.raise(builtin::TYPE_ERROR, Some("class and method expected")),
                    }
                }

                op::TCLASS => {
                    let a = fetch(code, pc)? as usize;
                    pc += 1;
                    self.pc = pc;
                    self.rset(base + a, Value::Class(self.target_class))?;
                }

                op::DEBUG => {
                    let (_, _, _) = fetch_bbb(code, &mut pc)?;
                    self.pc = pc;
                }

                op::ERR => {
                    let a = fetch(code, pc)? as usize;
                    pc += 1;
                    self.pc = pc;
                    let msg = irep
                        .pool_value(&self.pool, a)
                        .map(|v| self.display_string(&v));
                    self.raise(builtin::RUNTIME_ERROR, msg.as_deref());
                }

                op::STOP => {
                    return Ok(StopReason::Stop);
                }

                op::ABORT => {
                    return Ok(StopReason::Abort);
                }

                other => {
                    return Err(VmError::UnsupportedOpcode(other));
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Dispatch helpers
    // ------------------------------------------------------------------

    fn arith(&mut self, at: usize, opcode: u8) -> Result<(), VmError> {
        let x = self.rget(at)?;
        let y = self.rget(at + 1)?;
        match (&x, &y) {
            (Value::Integer(i), Value::Integer(j)) => {
                if opcode == op::DIV && *j == 0 {
                    self.raise(builtin::RUNTIME_ERROR, Some("divided by 0"));
                    return Ok(());
                }
                let v = match opcode {
                    op::ADD => i.wrapping_add(*j),
                    op::SUB => i.wrapping_sub(*j),
                    op::MUL => i.wrapping_mul(*j),
                    _ => i.wrapping_div(*j),
                };
                self.rset(at, Value::Integer(v))?;
                let _ = self.rtake(at + 1);
                Ok(())
            }
            (Value::Integer(_), Value::Float(_))
            | (Value::Float(_), Value::Integer(_))
            | (Value::Float(_), Value::Float(_)) => {
                let (i, j) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
                let v = match opcode {
                    op::ADD => i + j,
                    op::SUB => i - j,
                    op::MUL => i * j,
                    _ => i / j,
                };
                self.rset(at, Value::Float(v))?;
                let _ = self.rtake(at + 1);
                Ok(())
            }
            _ => {
                // Not numeric: fall back to an ordinary method dispatch,
                // so String#+ and friends work through the same opcode.
                let name = match opcode {
                    op::ADD => "+",
                    op::SUB => "-",
                    op::MUL => "*",
                    _ => "/",
                };
                self.send_by_name(at, name, 1)
            }
        }
    }

    fn ivar_get(&mut self, base: usize, sym: SymId) -> Result<Value, VmError> {
        let key = self.ivar_key(sym)?;
        match self.rref(base)? {
            Value::Object(o) => Ok(o.borrow().ivars.get_sym(key).cloned().unwrap_or(Value::Nil)),
            _ => Ok(Value::Nil),
        }
    }

    fn ivar_set(&mut self, base: usize, sym: SymId, v: Value) -> Result<(), VmError> {
        let key = self.ivar_key(sym)?;
        if let Value::Object(o) = self.rref(base)? {
            o.borrow_mut().ivars.set_sym(key, v);
        }
        Ok(())
    }

    /// Instance variables are keyed by their bare name; the `@` of the
    /// bytecode symbol is dropped so attribute shims and ivar opcodes
    /// agree on the key.
    fn ivar_key(&mut self, sym: SymId) -> Result<SymId, VmError> {
        let name = self.sym_owned(sym);
        match name.strip_prefix('@') {
            Some(bare) => {
                let bare = bare.to_string();
                match self.intern(&bare) {
                    Some(id) => Ok(id),
                    None => {
                        self.raise(builtin::NO_MEMORY_ERROR, None);
                        Ok(sym)
                    }
                }
            }
            None => Ok(sym),
        }
    }

    /// Resolve the frame that lexically encloses `base`, `up` extra
    /// levels out, through the proc in the window's receiver slot.
    fn upvar_base(&self, base: usize, up: usize) -> Option<usize> {
        let mut cur = base;
        for _ in 0..=up {
            match self.regs.get(cur) {
                Some(Value::Proc(p)) => cur = p.captured_base,
                _ => return None,
            }
        }
        Some(cur)
    }
}

fn fetch(code: &[u8], pc: usize) -> Result<u8, VmError> {
    code.get(pc).copied().ok_or(VmError::TruncatedCode)
}

fn fetch2(code: &[u8], pc: usize) -> Result<u16, VmError> {
    Ok(u16::from_be_bytes([fetch(code, pc)?, fetch(code, pc + 1)?]))
}

fn fetch3(code: &[u8], pc: usize) -> Result<u32, VmError> {
    Ok(((fetch(code, pc)? as u32) << 16)
        | ((fetch(code, pc + 1)? as u32) << 8)
        | fetch(code, pc + 2)? as u32)
}

fn fetch_bb(code: &[u8], pc: &mut usize) -> Result<(usize, usize), VmError> {
    let a = fetch(code, *pc)? as usize;
    let b = fetch(code, *pc + 1)? as usize;
    *pc += 2;
    Ok((a, b))
}

fn fetch_bbb(code: &[u8], pc: &mut usize) -> Result<(usize, usize, usize), VmError> {
    let a = fetch(code, *pc)? as usize;
    let b = fetch(code, *pc + 1)? as usize;
    let c = fetch(code, *pc + 2)? as usize;
    *pc += 3;
    Ok((a, b, c))
}

fn jump(pc: usize, s: i16) -> Result<usize, VmError> {
    let target = pc as i64 + s as i64;
    if target < 0 {
        Err(VmError::TruncatedCode)
    } else {
        Ok(target as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irep::IrepAssembler;

    fn run_asm(asm: &IrepAssembler) -> (Vm, StopReason) {
        let mut vm = Vm::new(VmConfig::default());
        let program = crate::load::load(asm.to_rite(), &mut vm.pool, &mut vm.symbols)
            .expect("assembled image must load");
        let reason = vm.execute(&program).expect("execution failed");
        program.release(&mut vm.pool);
        (vm, reason)
    }

    #[test]
    fn loads_and_adds_integers() {
        let mut asm = IrepAssembler::new();
        asm.code(&[
            op::LOADI, 1, 20,
            op::LOADI, 2, 22,
            op::ADD, 1,
            op::STOP,
        ]);
        let (vm, reason) = run_asm(&asm);
        assert_eq!(reason, StopReason::Stop);
        assert_eq!(vm.reg(1).as_integer(), Some(42));
    }

    #[test]
    fn short_loadi_forms_cover_minus_one_to_seven() {
        let mut asm = IrepAssembler::new();
        asm.code(&[
            op::LOADINEG1, 1,
            op::LOADI_0, 2,
            op::LOADI_7, 3,
            op::STOP,
        ]);
        let (vm, _) = run_asm(&asm);
        assert_eq!(vm.reg(1).as_integer(), Some(-1));
        assert_eq!(vm.reg(2).as_integer(), Some(0));
        assert_eq!(vm.reg(3).as_integer(), Some(7));
    }

    #[test]
    fn loadi16_sign_extends() {
        let mut asm = IrepAssembler::new();
        asm.code(&[op::LOADI16, 1, 0xff, 0xfe, op::STOP]);
        let (vm, _) = run_asm(&asm);
        assert_eq!(vm.reg(1).as_integer(), Some(-2));
    }

    #[test]
    fn pool_literals_load() {
        let mut asm = IrepAssembler::new();
        let s = asm.str_lit("hello");
        let f = asm.float_lit(2.5);
        asm.code(&[
            op::STRING, 1, s,
            op::LOADL, 2, f,
            op::STOP,
        ]);
        let (vm, _) = run_asm(&asm);
        assert_eq!(vm.display_string(vm.reg(1)), "hello");
        assert!(matches!(vm.reg(2), Value::Float(x) if *x == 2.5));
    }

    #[test]
    fn jmpnot_takes_the_false_branch() {
        // r1 = false; if r1 then r2 = 1 else r2 = 2
        let mut asm = IrepAssembler::new();
        asm.code(&[
            op::LOADF, 1,
            op::JMPNOT, 1, 0x00, 0x06, // over "then" (LOADI + JMP)
            op::LOADI, 2, 1,
            op::JMP, 0x00, 0x03,
            op::LOADI, 2, 2,
            op::STOP,
        ]);
        let (vm, _) = run_asm(&asm);
        assert_eq!(vm.reg(2).as_integer(), Some(2));
    }

    #[test]
    fn backward_jump_loops() {
        // r1 = 0; loop { r1 += 1; break when r1 >= 5 }
        let mut asm = IrepAssembler::new();
        asm.code(&[
            op::LOADI_0, 1,          // 0..2
            op::ADDI, 1, 1,          // 2..5
            op::MOVE, 2, 1,          // 5..8
            op::LOADI, 3, 5,         // 8..11
            op::LT, 2,               // 11..13  r2 = r1 < 5
            op::JMPIF, 2, 0xff, 0xf1, // 13..17  back to ADDI (-15)
            op::STOP,
        ]);
        let (vm, _) = run_asm(&asm);
        assert_eq!(vm.reg(1).as_integer(), Some(5));
    }

    #[test]
    fn float_arithmetic_promotes() {
        let mut asm = IrepAssembler::new();
        let f = asm.float_lit(1.5);
        asm.code(&[
            op::LOADL, 1, f,
            op::LOADI, 2, 2,
            op::MUL, 1,
            op::STOP,
        ]);
        let (vm, _) = run_asm(&asm);
        assert!(matches!(vm.reg(1), Value::Float(x) if *x == 3.0));
    }

    #[test]
    fn division_by_zero_raises() {
        let mut asm = IrepAssembler::new();
        asm.code(&[
            op::LOADI, 1, 4,
            op::LOADI_0, 2,
            op::DIV, 1,
            op::STOP,
        ]);
        let mut vm = Vm::new(VmConfig::default());
        vm.set_output(Box::new(Vec::new()));
        let program = crate::load::load(asm.to_rite(), &mut vm.pool, &mut vm.symbols).unwrap();
        let reason = vm.execute(&program).unwrap();
        assert_eq!(reason, StopReason::Uncaught);
    }

    #[test]
    fn array_and_range_constructors() {
        let mut asm = IrepAssembler::new();
        asm.code(&[
            op::LOADI, 1, 1,
            op::LOADI, 2, 2,
            op::LOADI, 3, 3,
            op::ARRAY, 1, 3,
            op::LOADI, 2, 1,
            op::LOADI, 3, 9,
            op::RANGE_INC, 2,
            op::STOP,
        ]);
        let (vm, _) = run_asm(&asm);
        assert_eq!(vm.inspect_string(vm.reg(1)), "[1, 2, 3]");
        assert_eq!(vm.display_string(vm.reg(2)), "1..9");
    }

    #[test]
    fn globals_round_trip_through_opcodes() {
        let mut asm = IrepAssembler::new();
        let g = asm.sym("$answer");
        asm.code(&[
            op::LOADI, 1, 42,
            op::SETGV, 1, g,
            op::LOADNIL, 1,
            op::GETGV, 2, g,
            op::STOP,
        ]);
        let (vm, _) = run_asm(&asm);
        assert_eq!(vm.reg(2).as_integer(), Some(42));
    }

    #[test]
    fn execute_refuses_nested_entry() {
        let mut asm = IrepAssembler::new();
        asm.code(&[op::STOP]);
        let mut vm = Vm::new(VmConfig::default());
        let program = crate::load::load(asm.to_rite(), &mut vm.pool, &mut vm.symbols).unwrap();
        vm.running = true;
        assert_eq!(vm.execute(&program), Err(VmError::NestedEntry));
        vm.running = false;
        assert!(vm.execute(&program).is_ok());
        program.release(&mut vm.pool);
    }

    #[test]
    fn unsupported_opcode_is_a_clean_error() {
        let mut asm = IrepAssembler::new();
        asm.code(&[op::SCLASS, 1, op::STOP]);
        let mut vm = Vm::new(VmConfig::default());
        let program = crate::load::load(asm.to_rite(), &mut vm.pool, &mut vm.symbols).unwrap();
        assert_eq!(
            vm.execute(&program),
            Err(VmError::UnsupportedOpcode(op::SCLASS))
        );
    }

    #[test]
    fn strcat_appends_display_form() {
        let mut asm = IrepAssembler::new();
        let s = asm.str_lit("n = ");
        asm.code(&[
            op::STRING, 1, s,
            op::LOADI, 2, 7,
            op::STRCAT, 1,
            op::STOP,
        ]);
        let (vm, _) = run_asm(&asm);
        assert_eq!(vm.display_string(vm.reg(1)), "n = 7");
    }
}
