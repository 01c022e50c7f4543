//! Exception classes.
//!
//! The class hierarchy itself is defined by the registry bootstrap;
//! this module only attaches the methods rescue clauses rely on.

use rite_vm::{builtin, Value, Vm};

pub fn register(vm: &mut Vm) {
    vm.define_native(builtin::EXCEPTION, "message", exception_message);
    vm.define_native(builtin::EXCEPTION, "to_s", exception_message);
    vm.define_native(builtin::EXCEPTION, "inspect", exception_inspect);
}

/// The attached message, or the class name when raised bare.
fn exception_message(vm: &mut Vm, base: usize, _argc: usize) {
    let v = match vm.reg(base) {
        Value::Exception(e) => match &e.message {
            Value::Nil => Value::string(vm.class_name(e.class)),
            m => m.clone(),
        },
        _ => Value::Nil,
    };
    vm.set_reg(base, v);
}

fn exception_inspect(vm: &mut Vm, base: usize, _argc: usize) {
    let text = vm.display_string(vm.reg(base));
    vm.set_reg(base, Value::string(text));
}
