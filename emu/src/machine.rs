//! The machine aggregate: exclusive owner of Memory, the control unit and
//! the device hook. Drivers and the presentation layer go through this
//! type; nothing here is reachable as shared mutable state.

use arch::obj::ObjectModule;

use crate::cpu::{ControlUnit, CpuError, CpuState};
use crate::hooks::{Console, Device};
use crate::loader::{self, LoadError};
use crate::memory::{Memory, DEFAULT_MEMORY_SIZE};
use crate::regs::RegisterFile;

pub struct Machine {
    memory: Memory,
    cpu: ControlUnit,
    device: Box<dyn Device>,
}

impl Machine {
    pub fn new(memory_size: usize) -> Self {
        Machine {
            memory: Memory::new(memory_size),
            cpu: ControlUnit::new(),
            device: Box::new(Console::new(false)),
        }
    }

    pub fn with_device(memory_size: usize, device: Box<dyn Device>) -> Self {
        Machine { memory: Memory::new(memory_size), cpu: ControlUnit::new(), device }
    }

    /// Loads a module at `base` and readies the engine at its entry point.
    pub fn load_program(
        &mut self,
        module: &mut ObjectModule,
        base: u32,
    ) -> Result<(), LoadError> {
        loader::load(module, &mut self.memory, base)?;
        self.cpu.prepare(module.start_address);
        Ok(())
    }

    pub fn step(&mut self) -> Result<CpuState, CpuError> {
        self.cpu.step(&mut self.memory, self.device.as_mut())
    }

    /// Runs until the engine leaves Running or `max_steps` is exhausted.
    pub fn run(&mut self, max_steps: u64) -> Result<CpuState, CpuError> {
        for _ in 0..max_steps {
            match self.step()? {
                CpuState::Running => continue,
                state => return Ok(state),
            }
        }
        Ok(self.cpu.state())
    }

    /// Drops memory contents and any loaded program, keeping the new size.
    pub fn resize_memory(&mut self, new_size: usize) {
        self.memory.resize(new_size);
        self.cpu.reset();
    }

    pub fn reset(&mut self) {
        self.cpu.reset();
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn registers(&self) -> &RegisterFile {
        self.cpu.registers()
    }

    pub fn state(&self) -> CpuState {
        self.cpu.state()
    }

    pub fn trace(&self) -> &[String] {
        self.cpu.trace()
    }

    pub fn control_unit(&self) -> &ControlUnit {
        &self.cpu
    }
}

impl Default for Machine {
    fn default() -> Self {
        Machine::new(DEFAULT_MEMORY_SIZE)
    }
}
