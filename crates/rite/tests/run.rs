//! Host entry round trips: init, create_task, run.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use rite::Runtime;
use rite_vm::opcode::op;
use rite_vm::{IrepAssembler, LoadError};

#[derive(Clone, Default)]
struct SharedBuf(Rc<RefCell<Vec<u8>>>);

impl SharedBuf {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn a_task_runs_to_completion_with_exit_code_one() {
    let mut runtime = Runtime::new(64 * 1024);
    let out = SharedBuf::default();
    runtime.vm_mut().set_output(Box::new(out.clone()));

    let mut asm = IrepAssembler::new();
    let hello = asm.str_lit("hello");
    let puts = asm.sym("puts");
    asm.code(&[
        op::STRING, 2, hello,
        op::SSEND, 1, puts, 1,
        op::STOP,
    ]);

    runtime.create_task(asm.to_rite()).unwrap();
    assert_eq!(runtime.run(), 1);
    assert_eq!(out.text(), "hello\n");
}

#[test]
fn an_uncaught_exception_yields_exit_code_zero() {
    let mut runtime = Runtime::new(64 * 1024);
    let out = SharedBuf::default();
    runtime.vm_mut().set_output(Box::new(out.clone()));

    let mut asm = IrepAssembler::new();
    let raise = asm.sym("raise");
    asm.code(&[
        op::SSEND, 1, raise, 0,
        op::STOP,
    ]);

    runtime.create_task(asm.to_rite()).unwrap();
    assert_eq!(runtime.run(), 0);
    assert_eq!(out.text(), "RuntimeError\n");
}

#[test]
fn create_task_rejects_garbage() {
    let mut runtime = Runtime::new(64 * 1024);
    assert_eq!(
        runtime.create_task(b"not bytecode".to_vec()).unwrap_err(),
        LoadError::BadHeader
    );
}

#[test]
fn tasks_run_sequentially_and_release_their_programs() {
    let mut runtime = Runtime::new(64 * 1024);
    let out = SharedBuf::default();
    runtime.vm_mut().set_output(Box::new(out.clone()));

    for text in ["first", "second"] {
        let mut asm = IrepAssembler::new();
        let lit = asm.str_lit(text);
        let puts = asm.sym("puts");
        asm.code(&[
            op::STRING, 2, lit,
            op::SSEND, 1, puts, 1,
            op::STOP,
        ]);
        runtime.create_task(asm.to_rite()).unwrap();
    }

    let used_before = runtime.vm().pool.statistics().used;
    assert_eq!(runtime.run(), 1);
    assert_eq!(out.text(), "first\nsecond\n");
    // Both irep trees were released; only symbol storage can remain,
    // and these names were interned at create_task time.
    assert!(runtime.vm().pool.statistics().used < used_before);
}
