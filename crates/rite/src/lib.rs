//! Host entry for the rite VM.
//!
//! The embedding contract: build a [`Runtime`] over a memory pool,
//! queue bytecode images as tasks, run them. Tasks execute sequentially
//! to completion; within a task the core is strictly single-threaded.

use rite_vm::{LoadError, Program, StopReason, Vm, VmConfig, DEFAULT_POOL_SIZE};

struct Task {
    program: Program,
}

/// The embedder's handle: one machine, a queue of tasks.
pub struct Runtime {
    vm: Vm,
    tasks: Vec<Task>,
}

impl Runtime {
    /// A runtime over a fresh pool of `pool_size` bytes, with every
    /// built-in class registered.
    pub fn new(pool_size: usize) -> Runtime {
        Runtime::with_config(VmConfig {
            pool_size,
            ..VmConfig::default()
        })
    }

    pub fn with_config(cfg: VmConfig) -> Runtime {
        let mut vm = Vm::new(cfg);
        rite_stdlib::register_all(&mut vm);
        Runtime {
            vm,
            tasks: Vec::new(),
        }
    }

    pub fn vm(&self) -> &Vm {
        &self.vm
    }

    pub fn vm_mut(&mut self) -> &mut Vm {
        &mut self.vm
    }

    /// Load a RITE02 image and queue it as a task.
    pub fn create_task(&mut self, bytecode: Vec<u8>) -> Result<(), LoadError> {
        let program = rite_vm::load(bytecode, &mut self.vm.pool, &mut self.vm.symbols)?;
        self.tasks.push(Task { program });
        Ok(())
    }

    /// Run every queued task to completion, releasing each task's irep
    /// tree afterwards. Returns 1 when all tasks completed normally, 0
    /// when any died on an uncaught exception or a machine error.
    pub fn run(&mut self) -> i32 {
        let tasks = std::mem::take(&mut self.tasks);
        let mut ok = true;
        for task in tasks {
            match self.vm.execute(&task.program) {
                Ok(StopReason::Stop) | Ok(StopReason::Abort) => {}
                Ok(StopReason::Uncaught) => ok = false,
                Err(e) => {
                    eprintln!("rite: {e}");
                    ok = false;
                }
            }
            task.program.release(&mut self.vm.pool);
        }
        if ok {
            1
        } else {
            0
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Runtime::new(DEFAULT_POOL_SIZE)
    }
}
