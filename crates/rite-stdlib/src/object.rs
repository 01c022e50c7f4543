//! Object, Proc, NilClass, TrueClass and FalseClass.

use std::cell::RefCell;
use std::rc::Rc;

use rite_vm::opcode::op;
use rite_vm::{
    builtin, compare, Instance, IrepAssembler, KvList, Value, Vm,
};

pub fn register(vm: &mut Vm) {
    vm.define_native(builtin::OBJECT, "new", object_new);
    vm.define_native(builtin::OBJECT, "!", object_not);
    vm.define_native(builtin::OBJECT, "!=", object_neq);
    vm.define_native(builtin::OBJECT, "<=>", object_cmp);
    vm.define_native(builtin::OBJECT, "===", object_equal3);
    vm.define_native(builtin::OBJECT, "class", object_class);
    vm.define_native(builtin::OBJECT, "dup", object_dup);
    vm.define_native(builtin::OBJECT, "block_given?", object_block_given);
    vm.define_native(builtin::OBJECT, "is_a?", object_kind_of);
    vm.define_native(builtin::OBJECT, "kind_of?", object_kind_of);
    vm.define_native(builtin::OBJECT, "nil?", object_nil);
    vm.define_native(builtin::OBJECT, "p", object_p);
    vm.define_native(builtin::OBJECT, "print", object_print);
    vm.define_native(builtin::OBJECT, "puts", object_puts);
    vm.define_native(builtin::OBJECT, "raise", object_raise);
    vm.define_native(builtin::OBJECT, "attr_reader", object_attr_reader);
    vm.define_native(builtin::OBJECT, "attr_accessor", object_attr_accessor);
    vm.define_native(builtin::OBJECT, "to_s", object_to_s);
    vm.define_native(builtin::OBJECT, "inspect", object_inspect);
    vm.define_native(builtin::OBJECT, "object_id", object_object_id);
    vm.define_native(builtin::OBJECT, "instance_methods", object_instance_methods);
    vm.define_native(builtin::OBJECT, "instance_variables", object_instance_variables);
    vm.define_native(builtin::OBJECT, "memory_statistics", object_memory_statistics);

    vm.define_native(builtin::PROC, "new", proc_new);
    vm.define_native(builtin::PROC, "call", proc_call);
    vm.define_native(builtin::PROC, "to_s", proc_to_s);
    vm.define_native(builtin::PROC, "inspect", proc_to_s);

    vm.define_native(builtin::NIL, "to_i", nil_to_i);
    vm.define_native(builtin::NIL, "to_a", nil_to_a);
    vm.define_native(builtin::NIL, "to_h", nil_to_h);
    vm.define_native(builtin::NIL, "to_f", nil_to_f);
    vm.define_native(builtin::NIL, "to_s", nil_to_s);
    vm.define_native(builtin::NIL, "inspect", nil_inspect);

    vm.define_native(builtin::TRUE, "to_s", true_to_s);
    vm.define_native(builtin::TRUE, "inspect", true_to_s);
    vm.define_native(builtin::FALSE, "to_s", false_to_s);
    vm.define_native(builtin::FALSE, "inspect", false_to_s);
}

/// `Class.new`: allocate the instance, then run `initialize` through a
/// synthesized one-shot frame. The receiver slot is rebound to the new
/// instance before the call so `initialize` sees the right `self`, and
/// the instance's class is re-asserted afterwards in case the
/// initializer rebound it.
fn object_new(vm: &mut Vm, base: usize, argc: usize) {
    let cls = match vm.reg(base) {
        Value::Class(c) => *c,
        _ => {
            vm.raise(builtin::TYPE_ERROR, Some("receiver is not a class"));
            return;
        }
    };
    let inst = Value::instance(cls);

    let has_init = match vm.intern("initialize") {
        Some(sym) => vm.classes.find_method(cls, sym).is_some(),
        None => false,
    };
    if !has_init {
        vm.set_reg(base, inst);
        return;
    }

    let mut asm = IrepAssembler::new();
    asm.nregs = (argc + 2) as u16;
    asm.code(&[op::SEND, 0, 0, argc as u8, op::ABORT]);
    asm.sym("initialize");
    let frame = match asm.build(&mut vm.pool, &mut vm.symbols) {
        Ok(irep) => irep,
        Err(_) => {
            vm.raise(builtin::NO_MEMORY_ERROR, None);
            return;
        }
    };

    vm.set_reg(base, inst.clone());
    vm.call_irep(Rc::clone(&frame), base);
    frame.release(&mut vm.pool);

    if let Value::Object(o) = &inst {
        o.borrow_mut().class = cls;
    }
    vm.set_reg(base, inst);
}

fn object_not(vm: &mut Vm, base: usize, _argc: usize) {
    let falsy = matches!(vm.reg(base), Value::Nil | Value::False);
    vm.set_reg(base, if falsy { Value::True } else { Value::False });
}

fn object_neq(vm: &mut Vm, base: usize, _argc: usize) {
    let eq = vm.reg(base).eq_value(vm.reg(base + 1));
    vm.set_reg(base, if eq { Value::False } else { Value::True });
}

/// `<=>`: the comparison sentinel surfaces as nil.
fn object_cmp(vm: &mut Vm, base: usize, _argc: usize) {
    let v = match compare(vm.reg(base), vm.reg(base + 1)) {
        Some(c) => Value::Integer(c as i64),
        None => Value::Nil,
    };
    vm.set_reg(base, v);
}

fn object_equal3(vm: &mut Vm, base: usize, _argc: usize) {
    let result = match vm.reg(base) {
        Value::Class(c) => vm.classes.is_kind_of(vm.reg(base + 1), *c),
        recv => recv.eq_value(vm.reg(base + 1)),
    };
    vm.set_reg(base, if result { Value::True } else { Value::False });
}

fn object_class(vm: &mut Vm, base: usize, _argc: usize) {
    let cls = vm.classes.class_of(vm.reg(base));
    vm.set_reg(base, Value::Class(cls));
}

fn object_dup(vm: &mut Vm, base: usize, _argc: usize) {
    if let Value::Object(o) = vm.reg(base) {
        let (class, ivars) = {
            let inner = o.borrow();
            (inner.class, inner.ivars.dup())
        };
        let copy = Rc::new(RefCell::new(Instance { class, ivars }));
        vm.set_reg(base, Value::Object(copy));
    }
    // TODO: Proc and Range receivers still pass through unchanged.
}

fn object_block_given(vm: &mut Vm, base: usize, _argc: usize) {
    let given = match vm.frame_info() {
        Some((frame_base, n_args)) => {
            let slot = frame_base + n_args + 1;
            slot < vm.regs_len() && matches!(vm.reg(slot), Value::Proc(_))
        }
        None => false,
    };
    vm.set_reg(base, if given { Value::True } else { Value::False });
}

fn object_kind_of(vm: &mut Vm, base: usize, _argc: usize) {
    let result = match vm.reg(base + 1) {
        Value::Class(c) => vm.classes.is_kind_of(vm.reg(base), *c),
        _ => false,
    };
    vm.set_reg(base, if result { Value::True } else { Value::False });
}

fn object_nil(vm: &mut Vm, base: usize, _argc: usize) {
    let is_nil = vm.reg(base).is_nil();
    vm.set_reg(base, if is_nil { Value::True } else { Value::False });
}

fn object_p(vm: &mut Vm, base: usize, argc: usize) {
    for i in 1..=argc {
        let v = vm.reg(base + i).clone();
        vm.p_value(&v);
    }
    let ret = match argc {
        0 => Value::Nil,
        1 => vm.reg(base + 1).clone(),
        _ => {
            let elems: Vec<Value> = (1..=argc).map(|i| vm.reg(base + i).clone()).collect();
            Value::array(elems)
        }
    };
    vm.set_reg(base, ret);
}

fn object_print(vm: &mut Vm, base: usize, argc: usize) {
    for i in 1..=argc {
        let v = vm.reg(base + i).clone();
        vm.print_value(&v);
    }
}

fn object_puts(vm: &mut Vm, base: usize, argc: usize) {
    if argc == 0 {
        vm.out_write(b"\n");
    } else {
        for i in 1..=argc {
            let v = vm.reg(base + i).clone();
            if !vm.puts_value(&v) {
                vm.out_write(b"\n");
            }
        }
    }
    vm.set_reg(base, Value::Nil);
}

/// The four raise forms: bare, message, class, class + message. Anything
/// else is itself a TypeError.
fn object_raise(vm: &mut Vm, base: usize, argc: usize) {
    match argc {
        0 => vm.raise(builtin::RUNTIME_ERROR, None),
        1 => match vm.reg(base + 1).clone() {
            Value::String(s) => vm.raise_value(builtin::RUNTIME_ERROR, Value::String(s)),
            Value::Class(c) => vm.raise_value(c, Value::Nil),
            _ => vm.raise(builtin::TYPE_ERROR, None),
        },
        2 => match (vm.reg(base + 1).clone(), vm.reg(base + 2).clone()) {
            (Value::Class(c), Value::String(s)) => vm.raise_value(c, Value::String(s)),
            _ => vm.raise(builtin::TYPE_ERROR, None),
        },
        _ => vm.raise(builtin::TYPE_ERROR, None),
    }
}

fn object_attr_reader(vm: &mut Vm, base: usize, argc: usize) {
    let cls = match vm.reg(base) {
        Value::Class(c) => *c,
        _ => return,
    };
    for i in 1..=argc {
        let name = match vm.reg(base + i) {
            Value::Symbol(s) => vm.sym_owned(*s),
            _ => continue,
        };
        vm.define_native(cls, &name, object_getiv);
    }
}

fn object_attr_accessor(vm: &mut Vm, base: usize, argc: usize) {
    let cls = match vm.reg(base) {
        Value::Class(c) => *c,
        _ => return,
    };
    for i in 1..=argc {
        let name = match vm.reg(base + i) {
            Value::Symbol(s) => vm.sym_owned(*s),
            _ => continue,
        };
        vm.define_native(cls, &name, object_getiv);
        vm.define_native(cls, &format!("{name}="), object_setiv);
    }
}

/// Generated attribute reader: the attribute name is the name this shim
/// was invoked under.
fn object_getiv(vm: &mut Vm, base: usize, _argc: usize) {
    let sym = match vm.last_callee() {
        Some(s) => s,
        None => return,
    };
    let v = match vm.reg(base) {
        Value::Object(o) => o.borrow().ivars.get_sym(sym).cloned().unwrap_or(Value::Nil),
        _ => Value::Nil,
    };
    vm.set_reg(base, v);
}

/// Generated attribute writer: callee name minus the trailing `=`.
fn object_setiv(vm: &mut Vm, base: usize, _argc: usize) {
    let sym = match vm.last_callee() {
        Some(s) => s,
        None => return,
    };
    let name = vm.sym_owned(sym);
    let bare = name.strip_prefix('@').unwrap_or(&name);
    let bare = bare.strip_suffix('=').unwrap_or(bare).to_string();
    let key = match vm.intern(&bare) {
        Some(k) => k,
        None => {
            vm.raise(builtin::NO_MEMORY_ERROR, None);
            return;
        }
    };
    let v = vm.reg(base + 1).clone();
    if let Value::Object(o) = vm.reg(base) {
        o.borrow_mut().ivars.set_sym(key, v);
    }
    let ret = vm.reg(base + 1).clone();
    vm.set_reg(base, ret);
}

fn object_to_s(vm: &mut Vm, base: usize, _argc: usize) {
    let text = vm.display_string(vm.reg(base));
    vm.set_reg(base, Value::string(text));
}

fn object_inspect(vm: &mut Vm, base: usize, _argc: usize) {
    let text = vm.inspect_string(vm.reg(base));
    vm.set_reg(base, Value::string(text));
}

fn object_object_id(vm: &mut Vm, base: usize, _argc: usize) {
    let id = match vm.reg(base) {
        Value::Integer(i) => *i,
        Value::Symbol(s) => s.as_u16() as i64,
        Value::Nil => 0,
        Value::True => 1,
        Value::False => 2,
        _ => 0, // tiny implementation, like the rest of the debug aids
    };
    vm.set_reg(base, Value::Integer(id));
}

fn object_instance_methods(vm: &mut Vm, base: usize, _argc: usize) {
    let cls = vm.classes.class_of(vm.reg(base));
    let names = vm.classes.method_names(cls);
    let mut text = String::from("[");
    for (i, sym) in names.iter().enumerate() {
        if i > 0 {
            text.push_str(", ");
        }
        text.push(':');
        text.push_str(vm.sym_str(*sym));
    }
    text.push(']');
    vm.out_write(text.as_bytes());
    vm.out_write(b"\n");
    vm.set_reg(base, Value::Nil);
}

fn object_instance_variables(vm: &mut Vm, base: usize, _argc: usize) {
    let mut names = Vec::new();
    if let Value::Object(o) = vm.reg(base) {
        for (k, _) in o.borrow().ivars.iter() {
            if let Value::Symbol(s) = k {
                names.push(*s);
            }
        }
    }
    let mut text = String::from("[");
    for (i, sym) in names.iter().enumerate() {
        if i > 0 {
            text.push_str(", ");
        }
        text.push_str(":@");
        text.push_str(vm.sym_str(*sym));
    }
    text.push(']');
    vm.out_write(text.as_bytes());
    vm.out_write(b"\n");
    vm.set_reg(base, Value::Nil);
}

fn object_memory_statistics(vm: &mut Vm, base: usize, _argc: usize) {
    let stats = vm.pool.statistics();
    let text = format!(
        "Memory Statistics\n  Total: {}\n  Used : {}\n  Free : {}\n  Frag.: {}\n",
        stats.total, stats.used, stats.free, stats.fragments
    );
    vm.out_write(text.as_bytes());
    vm.set_reg(base, Value::Nil);
}

// ----------------------------------------------------------------
// Proc
// ----------------------------------------------------------------

fn proc_new(vm: &mut Vm, base: usize, _argc: usize) {
    match vm.reg(base + 1) {
        Value::Proc(_) => {
            let p = vm.take_reg(base + 1);
            vm.set_reg(base, p);
        }
        _ => vm.raise(
            builtin::TYPE_ERROR,
            Some("Proc.new without a block is not supported"),
        ),
    }
}

fn proc_call(vm: &mut Vm, base: usize, argc: usize) {
    let p = match vm.reg(base) {
        Value::Proc(p) => Rc::clone(p),
        _ => {
            vm.raise(builtin::TYPE_ERROR, Some("receiver is not a proc"));
            return;
        }
    };
    let sym = match vm.intern("call") {
        Some(s) => s,
        None => {
            vm.raise(builtin::NO_MEMORY_ERROR, None);
            return;
        }
    };
    if let Err(e) = vm.enter_frame(Rc::clone(&p.irep), base, sym, argc) {
        vm.raise(builtin::RUNTIME_ERROR, Some(&e.to_string()));
    }
}

fn proc_to_s(vm: &mut Vm, base: usize, _argc: usize) {
    let text = vm.display_string(vm.reg(base));
    vm.set_reg(base, Value::string(text));
}

// ----------------------------------------------------------------
// NilClass, TrueClass, FalseClass
// ----------------------------------------------------------------

fn nil_to_i(vm: &mut Vm, base: usize, _argc: usize) {
    vm.set_reg(base, Value::Integer(0));
}

fn nil_to_a(vm: &mut Vm, base: usize, _argc: usize) {
    vm.set_reg(base, Value::array(Vec::new()));
}

fn nil_to_h(vm: &mut Vm, base: usize, _argc: usize) {
    vm.set_reg(base, Value::hash(KvList::new()));
}

fn nil_to_f(vm: &mut Vm, base: usize, _argc: usize) {
    vm.set_reg(base, Value::Float(0.0));
}

fn nil_to_s(vm: &mut Vm, base: usize, _argc: usize) {
    vm.set_reg(base, Value::string(""));
}

fn nil_inspect(vm: &mut Vm, base: usize, _argc: usize) {
    vm.set_reg(base, Value::string("nil"));
}

fn true_to_s(vm: &mut Vm, base: usize, _argc: usize) {
    vm.set_reg(base, Value::string("true"));
}

fn false_to_s(vm: &mut Vm, base: usize, _argc: usize) {
    vm.set_reg(base, Value::string("false"));
}
