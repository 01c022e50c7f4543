//! String class. Byte-safe throughout: indexing and length are in
//! bytes, content is never validated as UTF-8.

use rite_vm::{builtin, Value, Vm};

pub fn register(vm: &mut Vm) {
    vm.define_native(builtin::STRING, "+", string_add);
    vm.define_native(builtin::STRING, "===", string_eql);
    vm.define_native(builtin::STRING, "==", string_eql);
    vm.define_native(builtin::STRING, "size", string_size);
    vm.define_native(builtin::STRING, "length", string_size);
    vm.define_native(builtin::STRING, "to_i", string_to_i);
    vm.define_native(builtin::STRING, "to_f", string_to_f);
    vm.define_native(builtin::STRING, "to_s", string_to_s);
    vm.define_native(builtin::STRING, "<<", string_append);
    vm.define_native(builtin::STRING, "[]", string_slice);
    vm.define_native(builtin::STRING, "[]=", string_insert);
    vm.define_native(builtin::STRING, "ord", string_ord);
    vm.define_native(builtin::STRING, "inspect", string_inspect);
}

fn bytes_of(vm: &Vm, at: usize) -> Option<Vec<u8>> {
    match vm.reg(at) {
        Value::String(s) => Some(s.borrow().bytes.clone()),
        _ => None,
    }
}

fn string_add(vm: &mut Vm, base: usize, _argc: usize) {
    let lhs = match bytes_of(vm, base) {
        Some(b) => b,
        None => return,
    };
    let rhs = match bytes_of(vm, base + 1) {
        Some(b) => b,
        None => {
            vm.raise(builtin::TYPE_ERROR, Some("cannot add non-string to string"));
            return;
        }
    };
    let mut joined = lhs;
    joined.extend_from_slice(&rhs);
    vm.set_reg(base, Value::string(joined));
}

fn string_eql(vm: &mut Vm, base: usize, _argc: usize) {
    let eq = match (vm.reg(base), vm.reg(base + 1)) {
        (Value::String(a), Value::String(b)) => a.borrow().bytes == b.borrow().bytes,
        _ => false,
    };
    vm.set_reg(base, if eq { Value::True } else { Value::False });
}

fn string_size(vm: &mut Vm, base: usize, _argc: usize) {
    let len = match vm.reg(base) {
        Value::String(s) => s.borrow().len() as i64,
        _ => 0,
    };
    vm.set_reg(base, Value::Integer(len));
}

/// Leading-prefix integer parse in the given base (2..36, default 10),
/// skipping leading whitespace, stopping at the first invalid byte.
fn string_to_i(vm: &mut Vm, base: usize, argc: usize) {
    let radix = if argc >= 1 {
        match vm.reg(base + 1).as_integer() {
            Some(b) if (2..=36).contains(&b) => b as u32,
            Some(_) => {
                vm.raise(builtin::ARGUMENT_ERROR, Some("invalid radix"));
                return;
            }
            None => 10,
        }
    } else {
        10
    };
    let bytes = match bytes_of(vm, base) {
        Some(b) => b,
        None => return,
    };
    vm.set_reg(base, Value::Integer(parse_int_prefix(&bytes, radix)));
}

fn parse_int_prefix(bytes: &[u8], radix: u32) -> i64 {
    let mut i = 0;
    while i < bytes.len() && (bytes[i] == b' ' || bytes[i] == b'\t' || bytes[i] == b'\n') {
        i += 1;
    }
    let negative = match bytes.get(i) {
        Some(b'-') => {
            i += 1;
            true
        }
        Some(b'+') => {
            i += 1;
            false
        }
        _ => false,
    };
    let mut value: i64 = 0;
    while i < bytes.len() {
        let digit = match (bytes[i] as char).to_digit(radix) {
            Some(d) => d as i64,
            None => break,
        };
        value = value.wrapping_mul(radix as i64).wrapping_add(digit);
        i += 1;
    }
    if negative {
        -value
    } else {
        value
    }
}

/// Leading-prefix float parse, `atof`-style.
fn string_to_f(vm: &mut Vm, base: usize, _argc: usize) {
    let bytes = match bytes_of(vm, base) {
        Some(b) => b,
        None => return,
    };
    vm.set_reg(base, Value::Float(parse_float_prefix(&bytes)));
}

fn parse_float_prefix(bytes: &[u8]) -> f64 {
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim_start();
    let mut end = 0;
    let mut seen_dot = false;
    let mut seen_exp = false;
    for (i, c) in trimmed.char_indices() {
        let ok = match c {
            '0'..='9' => true,
            '+' | '-' => i == 0 || trimmed[..i].ends_with(['e', 'E']),
            '.' if !seen_dot && !seen_exp => {
                seen_dot = true;
                true
            }
            'e' | 'E' if !seen_exp && i > 0 => {
                seen_exp = true;
                true
            }
            _ => false,
        };
        if !ok {
            break;
        }
        end = i + c.len_utf8();
    }
    trimmed[..end].parse().unwrap_or(0.0)
}

fn string_to_s(_vm: &mut Vm, _base: usize, _argc: usize) {
    // Identity.
}

/// `<<`: append a string's bytes, or an integer as a single byte.
fn string_append(vm: &mut Vm, base: usize, _argc: usize) {
    let extra: Vec<u8> = match vm.reg(base + 1) {
        Value::String(s) => s.borrow().bytes.clone(),
        Value::Integer(i) => vec![*i as u8],
        _ => {
            vm.raise(builtin::TYPE_ERROR, Some("cannot append this to string"));
            return;
        }
    };
    if let Value::String(s) = vm.reg(base) {
        s.borrow_mut().bytes.extend_from_slice(&extra);
    }
}

/// `[]`: `s[nth]` and `s[nth, len]`, negative indices counting from the
/// end, nil when out of range.
fn string_slice(vm: &mut Vm, base: usize, argc: usize) {
    let bytes = match bytes_of(vm, base) {
        Some(b) => b,
        None => return,
    };
    let len = bytes.len() as i64;

    let result = match argc {
        1 => match vm.reg(base + 1).as_integer() {
            Some(mut idx) => {
                if idx < 0 {
                    idx += len;
                }
                if (0..len).contains(&idx) {
                    Some(vec![bytes[idx as usize]])
                } else {
                    None
                }
            }
            None => {
                vm.raise(builtin::ARGUMENT_ERROR, Some("unsupported index form"));
                return;
            }
        },
        2 => match (
            vm.reg(base + 1).as_integer(),
            vm.reg(base + 2).as_integer(),
        ) {
            (Some(mut idx), Some(want)) => {
                if idx < 0 {
                    idx += len;
                }
                let take = want.min(len - idx);
                if idx < 0 || idx > len || take < 0 {
                    None
                } else {
                    let start = idx as usize;
                    Some(bytes[start..start + take as usize].to_vec())
                }
            }
            _ => {
                vm.raise(builtin::ARGUMENT_ERROR, Some("unsupported index form"));
                return;
            }
        },
        _ => {
            vm.raise(builtin::ARGUMENT_ERROR, Some("unsupported index form"));
            return;
        }
    };

    match result {
        Some(piece) => vm.set_reg(base, Value::string(piece)),
        None => vm.set_reg(base, Value::Nil),
    }
}

/// `[]=`: `s[nth] = str` and `s[nth, len] = str`, splicing in place.
fn string_insert(vm: &mut Vm, base: usize, argc: usize) {
    let (nth, del, val_at) = match argc {
        2 => match vm.reg(base + 1).as_integer() {
            Some(n) => (n, 1i64, base + 2),
            None => {
                vm.raise(builtin::ARGUMENT_ERROR, Some("unsupported index form"));
                return;
            }
        },
        3 => match (
            vm.reg(base + 1).as_integer(),
            vm.reg(base + 2).as_integer(),
        ) {
            (Some(n), Some(l)) => (n, l, base + 3),
            _ => {
                vm.raise(builtin::ARGUMENT_ERROR, Some("unsupported index form"));
                return;
            }
        },
        _ => {
            vm.raise(builtin::ARGUMENT_ERROR, Some("unsupported index form"));
            return;
        }
    };
    let repl = match vm.reg(val_at) {
        Value::String(s) => s.borrow().bytes.clone(),
        _ => {
            vm.raise(builtin::TYPE_ERROR, Some("replacement must be a string"));
            return;
        }
    };

    let target = match vm.reg(base) {
        Value::String(s) => s.clone(),
        _ => return,
    };
    let len = target.borrow().len() as i64;
    let mut nth = nth;
    if nth < 0 {
        nth += len;
    }
    let del = del.min(len - nth);
    if nth < 0 || nth > len || del < 0 {
        vm.raise(builtin::INDEX_ERROR, Some("index out of string"));
        return;
    }
    let start = nth as usize;
    let stop = start + del as usize;
    target.borrow_mut().bytes.splice(start..stop, repl.iter().copied());

    let ret = vm.reg(val_at).clone();
    vm.set_reg(base, ret);
}

fn string_ord(vm: &mut Vm, base: usize, _argc: usize) {
    let bytes = match bytes_of(vm, base) {
        Some(b) => b,
        None => return,
    };
    match bytes.first() {
        Some(&b) => vm.set_reg(base, Value::Integer(b as i64)),
        None => vm.raise(builtin::ARGUMENT_ERROR, Some("empty string")),
    }
}

fn string_inspect(vm: &mut Vm, base: usize, _argc: usize) {
    let text = vm.inspect_string(vm.reg(base));
    vm.set_reg(base, Value::string(text));
}
