use super::op::Opcode;
use super::Address;
use crate::error;
use crate::lang::Error;

type Result<T> = std::result::Result<T, Error>;

/// Target PC of the first emitted instruction. The companion VM loads the
/// image here.
pub const PC_START: Address = 0x0000;

/// The VM call stack grows down from the top of its address space.
pub const CALL_STACK_TOP: Address = 0xbfff;
pub const CALL_STACK_LIM: Address = 0x9800;

/// Ceiling on the code buffer.
const CODE_LIM: usize = 0x8000;

/// ## Code emitter
///
/// Writes opcodes and little-endian 16-bit operands to a growing buffer
/// while advancing a parallel target PC. Also simulates the VM call stack
/// pointer so the addresses handed to variables at compile time match what
/// the VM will see at run time: every `rt_push`/`rt_pop` here must be
/// matched by an emitted `PSHWORD`/`PSHBYTE`/`POPWORD`/... instruction.
#[derive(Debug)]
pub struct Emitter {
    code: Vec<u8>,
    pc: Address,
    rt_sp: Address,
    rt_fp: Address,
}

impl Emitter {
    pub fn new() -> Emitter {
        Emitter {
            code: vec![],
            pc: PC_START,
            rt_sp: CALL_STACK_TOP,
            rt_fp: CALL_STACK_TOP,
        }
    }

    /// Drop all code and reset the simulated machine. Called when `comp`
    /// begins.
    pub fn reset(&mut self) {
        self.code.clear();
        self.pc = PC_START;
        self.rt_sp = CALL_STACK_TOP;
        self.rt_fp = CALL_STACK_TOP;
    }

    pub fn pc(&self) -> Address {
        self.pc
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    fn put(&mut self, byte: u8) -> Result<()> {
        if self.code.len() >= CODE_LIM {
            return Err(error!(NoMemory));
        }
        self.code.push(byte);
        Ok(())
    }

    /// Emit a plain one-byte instruction.
    pub fn emit(&mut self, op: Opcode) -> Result<()> {
        debug_assert!(!op.has_operand());
        self.put(op as u8)?;
        self.pc = self.pc.wrapping_add(1);
        Ok(())
    }

    /// Emit an instruction with a 16-bit operand.
    pub fn emit_imm(&mut self, op: Opcode, word: i16) -> Result<()> {
        debug_assert!(op.has_operand());
        self.put(op as u8)?;
        let bytes = (word as u16).to_le_bytes();
        self.put(bytes[0])?;
        self.put(bytes[1])?;
        self.pc = self.pc.wrapping_add(3);
        Ok(())
    }

    /// Push a literal on the VM evaluation stack.
    pub fn emit_ldi(&mut self, word: i16) -> Result<()> {
        self.emit_imm(Opcode::Ldimm, word)
    }

    /// Emit `PRMSG` with its inline NUL-terminated string.
    pub fn emit_msg(&mut self, msg: &str) -> Result<()> {
        self.put(Opcode::Prmsg as u8)?;
        self.pc = self.pc.wrapping_add(1);
        for byte in msg.bytes() {
            self.put(byte)?;
            self.pc = self.pc.wrapping_add(1);
        }
        self.put(0)?;
        self.pc = self.pc.wrapping_add(1);
        Ok(())
    }

    /// Rewrite the 16-bit operand at target address `addr`. Used to patch
    /// forward branches once the destination is known.
    pub fn fixup(&mut self, addr: Address, word: Address) {
        let index = (addr - PC_START) as usize;
        let bytes = word.to_le_bytes();
        self.code[index] = bytes[0];
        self.code[index + 1] = bytes[1];
    }

    pub fn rt_sp(&self) -> Address {
        self.rt_sp
    }

    pub fn rt_fp(&self) -> Address {
        self.rt_fp
    }

    /// Allocate on the simulated call stack, returning the new SP.
    pub fn rt_push(&mut self, bytes: Address) -> Result<Address> {
        match self.rt_sp.checked_sub(bytes) {
            Some(sp) if sp >= CALL_STACK_LIM => {
                self.rt_sp = sp;
                Ok(sp)
            }
            _ => Err(error!(NoMemory)),
        }
    }

    pub fn rt_pop(&mut self, bytes: Address) {
        self.rt_sp += bytes;
    }

    /// Track an emitted `SPTOFP` at subroutine entry.
    pub fn rt_enter_frame(&mut self) {
        self.rt_fp = self.rt_sp;
    }

    /// Track an emitted `FPTOSP`, which drops the locals.
    pub fn rt_leave_frame(&mut self) {
        self.rt_sp = self.rt_fp;
    }

    /// Write the finished image verbatim. No header, no symbol table.
    pub fn write_file(&self, filename: &str) -> Result<()> {
        std::fs::write(filename, &self.code).map_err(|_| error!(File))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let mut e = Emitter::new();
        e.emit_ldi(0x1234).unwrap();
        e.emit(Opcode::Add).unwrap();
        assert_eq!(e.code(), &[Opcode::Ldimm as u8, 0x34, 0x12, Opcode::Add as u8]);
        assert_eq!(e.pc(), PC_START + 4);
    }

    #[test]
    fn test_fixup() {
        let mut e = Emitter::new();
        let operand_at = e.pc() + 1;
        e.emit_imm(Opcode::Brnchimm, -1).unwrap();
        e.emit(Opcode::End).unwrap();
        e.fixup(operand_at, e.pc());
        assert_eq!(&e.code()[1..3], &(4u16).to_le_bytes());
    }

    #[test]
    fn test_msg() {
        let mut e = Emitter::new();
        e.emit_msg("hi").unwrap();
        assert_eq!(e.code(), &[Opcode::Prmsg as u8, b'h', b'i', 0]);
        assert_eq!(e.pc(), PC_START + 4);
    }

    #[test]
    fn test_rt_stack() {
        let mut e = Emitter::new();
        let addr = e.rt_push(2).unwrap();
        assert_eq!(addr, CALL_STACK_TOP - 2);
        e.rt_pop(2);
        assert_eq!(e.rt_sp(), CALL_STACK_TOP);
    }
}
