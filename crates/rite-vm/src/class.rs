//! Class registry and method lookup.
//!
//! Classes are append-only and live for the process: a [`ClassId`] handle
//! never dangles. Each class carries its name symbol, an optional
//! superclass and a method list. Registration prepends, lookup scans
//! newest-first, so a redefinition shadows the old body immediately and
//! methods are never unregistered.

use std::rc::Rc;

use rite_core::{Pool, SymId, SymbolTable};

use crate::irep::Irep;
use crate::value::Value;
use crate::vm::Vm;

/// Handle into the class registry.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct ClassId(u16);

impl ClassId {
    pub fn new(raw: u16) -> Self {
        ClassId(raw)
    }

    pub fn as_u16(self) -> u16 {
        self.0
    }
}

/// Built-in classes, defined by [`ClassRegistry::bootstrap`] in this
/// exact order.
pub mod builtin {
    use super::ClassId;

    pub const OBJECT: ClassId = ClassId(0);
    pub const NIL: ClassId = ClassId(1);
    pub const TRUE: ClassId = ClassId(2);
    pub const FALSE: ClassId = ClassId(3);
    pub const INTEGER: ClassId = ClassId(4);
    pub const FLOAT: ClassId = ClassId(5);
    pub const SYMBOL: ClassId = ClassId(6);
    pub const STRING: ClassId = ClassId(7);
    pub const ARRAY: ClassId = ClassId(8);
    pub const HASH: ClassId = ClassId(9);
    pub const RANGE: ClassId = ClassId(10);
    pub const PROC: ClassId = ClassId(11);
    pub const EXCEPTION: ClassId = ClassId(12);
    pub const STANDARD_ERROR: ClassId = ClassId(13);
    pub const RUNTIME_ERROR: ClassId = ClassId(14);
    pub const TYPE_ERROR: ClassId = ClassId(15);
    pub const ARGUMENT_ERROR: ClassId = ClassId(16);
    pub const INDEX_ERROR: ClassId = ClassId(17);
    pub const RANGE_ERROR: ClassId = ClassId(18);
    pub const NO_MEMORY_ERROR: ClassId = ClassId(19);
    pub const BYTECODE_ERROR: ClassId = ClassId(20);
}

/// A native method body: `(vm, register window base, argc)`. The receiver
/// sits at the window base, arguments follow, and the return value is
/// written back to the base slot.
pub type NativeFn = fn(&mut Vm, usize, usize);

/// A callable bound to a name on some class.
#[derive(Clone)]
pub enum Method {
    Native(NativeFn),
    Script(Rc<Irep>),
}

struct MethodEntry {
    sym: SymId,
    body: Method,
}

/// One class: name, parent, method list.
pub struct Class {
    pub sym_id: SymId,
    pub super_class: Option<ClassId>,
    methods: Vec<MethodEntry>,
}

/// Append-only class table.
pub struct ClassRegistry {
    classes: Vec<Class>,
}

impl ClassRegistry {
    /// Build the registry with every built-in class defined, in the
    /// order fixed by [`builtin`].
    pub fn bootstrap(pool: &mut Pool, symbols: &mut SymbolTable) -> Self {
        let mut reg = ClassRegistry {
            classes: Vec::new(),
        };
        let table: &[(&str, Option<ClassId>)] = &[
            ("Object", None),
            ("NilClass", Some(builtin::OBJECT)),
            ("TrueClass", Some(builtin::OBJECT)),
            ("FalseClass", Some(builtin::OBJECT)),
            ("Integer", Some(builtin::OBJECT)),
            ("Float", Some(builtin::OBJECT)),
            ("Symbol", Some(builtin::OBJECT)),
            ("String", Some(builtin::OBJECT)),
            ("Array", Some(builtin::OBJECT)),
            ("Hash", Some(builtin::OBJECT)),
            ("Range", Some(builtin::OBJECT)),
            ("Proc", Some(builtin::OBJECT)),
            ("Exception", Some(builtin::OBJECT)),
            ("StandardError", Some(builtin::EXCEPTION)),
            ("RuntimeError", Some(builtin::STANDARD_ERROR)),
            ("TypeError", Some(builtin::STANDARD_ERROR)),
            ("ArgumentError", Some(builtin::STANDARD_ERROR)),
            ("IndexError", Some(builtin::STANDARD_ERROR)),
            ("RangeError", Some(builtin::STANDARD_ERROR)),
            ("NoMemoryError", Some(builtin::EXCEPTION)),
            ("BytecodeError", Some(builtin::EXCEPTION)),
        ];
        for (name, sup) in table {
            let sym = symbols
                .intern(pool, name)
                .expect("symbol table too small for class bootstrap");
            reg.classes.push(Class {
                sym_id: sym,
                super_class: *sup,
                methods: Vec::new(),
            });
        }
        reg
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn get(&self, id: ClassId) -> &Class {
        &self.classes[id.0 as usize]
    }

    /// Define a class, or return the existing one of the same name. The
    /// superclass of an existing class is left alone.
    pub fn define_class(&mut self, name_sym: SymId, super_class: ClassId) -> ClassId {
        if let Some(id) = self.find_class(name_sym) {
            return id;
        }
        let id = ClassId(self.classes.len() as u16);
        self.classes.push(Class {
            sym_id: name_sym,
            super_class: Some(super_class),
            methods: Vec::new(),
        });
        id
    }

    /// Find a class by name symbol.
    pub fn find_class(&self, name_sym: SymId) -> Option<ClassId> {
        self.classes
            .iter()
            .position(|c| c.sym_id == name_sym)
            .map(|i| ClassId(i as u16))
    }

    /// Bind `body` to `sym` on `class`, shadowing any previous binding.
    pub fn define_method(&mut self, class: ClassId, sym: SymId, body: Method) {
        self.classes[class.0 as usize]
            .methods
            .push(MethodEntry { sym, body });
    }

    /// Walk the method chain of `class`, then its ancestors, newest
    /// binding first. Returns the body and the class that owns it.
    pub fn find_method(&self, class: ClassId, sym: SymId) -> Option<(Method, ClassId)> {
        let mut cur = Some(class);
        while let Some(id) = cur {
            let cls = &self.classes[id.0 as usize];
            for entry in cls.methods.iter().rev() {
                if entry.sym == sym {
                    return Some((entry.body.clone(), id));
                }
            }
            cur = cls.super_class;
        }
        None
    }

    /// Names bound directly on `class`, newest first, ancestors not
    /// included.
    pub fn method_names(&self, class: ClassId) -> Vec<SymId> {
        self.classes[class.0 as usize]
            .methods
            .iter()
            .rev()
            .map(|m| m.sym)
            .collect()
    }

    /// Is `ancestor` reachable from `class` through the parent chain?
    pub fn is_ancestor(&self, class: ClassId, ancestor: ClassId) -> bool {
        let mut cur = Some(class);
        while let Some(id) = cur {
            if id == ancestor {
                return true;
            }
            cur = self.classes[id.0 as usize].super_class;
        }
        false
    }

    /// The class a value dispatches through.
    pub fn class_of(&self, v: &Value) -> ClassId {
        match v {
            Value::Nil | Value::Empty => builtin::NIL,
            Value::False => builtin::FALSE,
            Value::True => builtin::TRUE,
            Value::Integer(_) => builtin::INTEGER,
            Value::Float(_) => builtin::FLOAT,
            Value::Symbol(_) => builtin::SYMBOL,
            Value::String(_) => builtin::STRING,
            Value::Array(_) => builtin::ARRAY,
            Value::Hash(_) => builtin::HASH,
            Value::Range(_) => builtin::RANGE,
            Value::Proc(_) => builtin::PROC,
            Value::Exception(e) => e.class,
            Value::Object(o) => o.borrow().class,
            // A class receives its own methods ("class methods" share the
            // instance chain here, as in the original).
            Value::Class(c) => *c,
            Value::Handle(_) => builtin::OBJECT,
        }
    }

    /// `kind_of?`: does the value's class chain pass through `class`?
    pub fn is_kind_of(&self, v: &Value, class: ClassId) -> bool {
        self.is_ancestor(self.class_of(v), class)
    }
}
