//! Symbol class.

use rite_core::SymId;
use rite_vm::{builtin, Value, Vm};

pub fn register(vm: &mut Vm) {
    vm.define_native(builtin::SYMBOL, "all_symbols", symbol_all_symbols);
    vm.define_native(builtin::SYMBOL, "inspect", symbol_inspect);
    vm.define_native(builtin::SYMBOL, "to_s", symbol_to_s);
    vm.define_native(builtin::SYMBOL, "id2name", symbol_to_s);
    vm.define_native(builtin::SYMBOL, "to_sym", symbol_to_sym);
}

fn symbol_all_symbols(vm: &mut Vm, base: usize, _argc: usize) {
    let elems: Vec<Value> = (0..vm.symbols.len())
        .map(|i| Value::Symbol(SymId::new(i as u16)))
        .collect();
    vm.set_reg(base, Value::array(elems));
}

fn symbol_inspect(vm: &mut Vm, base: usize, _argc: usize) {
    if let Value::Symbol(s) = vm.reg(base) {
        let text = format!(":{}", vm.sym_str(*s));
        vm.set_reg(base, Value::string(text));
    }
}

fn symbol_to_s(vm: &mut Vm, base: usize, _argc: usize) {
    if let Value::Symbol(s) = vm.reg(base) {
        let text = vm.sym_owned(*s);
        vm.set_reg(base, Value::string(text));
    }
}

fn symbol_to_sym(_vm: &mut Vm, _base: usize, _argc: usize) {
    // Identity.
}
