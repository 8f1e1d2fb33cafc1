use super::heap::Heap;
use super::Address;
use crate::error;
use crate::lang::Error;

type Result<T> = std::result::Result<T, Error>;

/// Variable names are significant to 4 characters.
pub const VAR_NAME_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VarName([u8; VAR_NAME_LEN]);

impl VarName {
    pub fn new(name: &str) -> VarName {
        let mut key = [0u8; VAR_NAME_LEN];
        for (slot, byte) in key.iter_mut().zip(name.bytes()) {
            *slot = byte;
        }
        VarName(key)
    }
}

impl std::fmt::Display for VarName {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        for &byte in self.0.iter() {
            write!(f, "{}", if byte == 0 { ' ' } else { byte as char })?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BaseType {
    Word,
    Byte,
}

impl BaseType {
    pub fn size(&self) -> usize {
        match self {
            BaseType::Word => 2,
            BaseType::Byte => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Shape {
    Scalar,
    /// `addr` points at the first element; `len` elements follow.
    Array { len: i16 },
    /// Compiled pass-by-reference parameter: `addr` locates a pointer to
    /// the body, so every access does one extra indirection.
    ArrayRef,
}

/// A symbol table record. The meaning of `addr` depends on the engine
/// mode: interpreting, it is the heap address of the payload; compiling,
/// it is the VM address of the runtime cell (absolute for globals,
/// FP-relative for locals) or, for a `const`, the value itself.
#[derive(Debug, Clone)]
pub struct Var {
    key: VarName,
    full: String,
    pub ty: BaseType,
    pub is_const: bool,
    pub shape: Shape,
    pub addr: i16,
}

impl Var {
    pub fn name(&self) -> VarName {
        self.key
    }
}

#[derive(Debug, Clone, Copy)]
struct ScopeMark {
    vars_len: usize,
    heap_mark: Address,
}

/// ## Symbol table
///
/// A single append-only list of records partitioned into lexical frames by
/// a mark stack: each mark captures the list length and the arena pointer
/// at subroutine entry, so leaving a frame truncates the list and releases
/// the frame's storage in O(1).
///
/// Lookup searches the current frame first, then the globals (the records
/// before the first mark). Enclosing subroutine frames are invisible.
#[derive(Debug)]
pub struct VarTab {
    vars: Vec<Var>,
    scopes: Vec<ScopeMark>,
    pub heap: Heap,
}

impl VarTab {
    pub fn new() -> VarTab {
        VarTab {
            vars: vec![],
            scopes: vec![],
            heap: Heap::new(),
        }
    }

    /// Drop every variable and all storage (`clear`, and the start of each
    /// `run`).
    pub fn clear(&mut self) {
        self.vars.clear();
        self.scopes.clear();
        self.heap.clear();
    }

    pub fn enter_scope(&mut self) {
        self.scopes.push(ScopeMark {
            vars_len: self.vars.len(),
            heap_mark: self.heap.mark(),
        });
    }

    pub fn leave_scope(&mut self) {
        if let Some(mark) = self.scopes.pop() {
            self.vars.truncate(mark.vars_len);
            self.heap.release_to(mark.heap_mark);
        }
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    fn local_start(&self) -> usize {
        self.scopes.last().map_or(0, |m| m.vars_len)
    }

    fn global_end(&self) -> usize {
        self.scopes.first().map_or(self.vars.len(), |m| m.vars_len)
    }

    /// Find a record by truncated name. Returns the index and whether it
    /// was found in the current frame.
    pub fn find(&self, name: &str, local_only: bool) -> Option<(usize, bool)> {
        let key = VarName::new(name);
        let local_start = self.local_start();
        for (index, var) in self.vars.iter().enumerate().skip(local_start) {
            if var.key == key {
                return Some((index, true));
            }
        }
        if local_only {
            return None;
        }
        for (index, var) in self.vars.iter().enumerate().take(self.global_end()) {
            if var.key == key {
                return Some((index, false));
            }
        }
        None
    }

    pub fn get(&self, index: usize) -> &Var {
        &self.vars[index]
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Var> {
        self.vars.iter()
    }

    /// Redefinition check plus truncation-collision diagnosis for a name
    /// about to be created in the current frame.
    fn check_new(&self, name: &str) -> Result<Option<String>> {
        if self.find(name, true).is_some() {
            return Err(error!(Redefined));
        }
        let key = VarName::new(name);
        Ok(self
            .vars
            .iter()
            .find(|v| v.key == key && v.full != name)
            .map(|v| v.full.clone()))
    }

    fn push_var(&mut self, name: &str, ty: BaseType, is_const: bool, shape: Shape, addr: i16) {
        self.vars.push(Var {
            key: VarName::new(name),
            full: name.to_string(),
            ty,
            is_const,
            shape,
            addr,
        });
    }

    /// Create an interpreted scalar, allocating its cell on the heap.
    pub fn create_scalar(
        &mut self,
        name: &str,
        ty: BaseType,
        is_const: bool,
        value: i16,
    ) -> Result<Option<String>> {
        let collision = self.check_new(name)?;
        let addr = self.heap.alloc(ty.size())?;
        match ty {
            BaseType::Word => self.heap.write_word(addr, value)?,
            BaseType::Byte => self.heap.write_byte(addr, value as u8)?,
        }
        self.push_var(name, ty, is_const, Shape::Scalar, addr as i16);
        Ok(collision)
    }

    /// Create an interpreted array, allocating a zeroed body. Returns the
    /// body address so the caller can run the initialiser.
    pub fn create_array(
        &mut self,
        name: &str,
        ty: BaseType,
        len: i16,
    ) -> Result<(Address, Option<String>)> {
        let collision = self.check_new(name)?;
        if len < 1 {
            return Err(error!(BadDimension));
        }
        let body = self.heap.alloc(len as usize * ty.size())?;
        for i in 0..len as usize * ty.size() {
            self.heap.write_byte(body + i as Address, 0)?;
        }
        self.push_var(name, ty, false, Shape::Array { len }, body as i16);
        Ok((body, collision))
    }

    /// Create an interpreted array record sharing an existing body: the
    /// callee side of pass-by-reference.
    pub fn create_array_shared(
        &mut self,
        name: &str,
        ty: BaseType,
        len: i16,
        body: Address,
    ) -> Result<Option<String>> {
        let collision = self.check_new(name)?;
        self.push_var(name, ty, false, Shape::Array { len }, body as i16);
        Ok(collision)
    }

    /// Create a compiled variable whose runtime cell is at `addr` in the
    /// target. Used for scalars and array bodies alike.
    pub fn create_compiled(
        &mut self,
        name: &str,
        ty: BaseType,
        shape: Shape,
        addr: i16,
    ) -> Result<Option<String>> {
        let collision = self.check_new(name)?;
        self.push_var(name, ty, false, shape, addr);
        Ok(collision)
    }

    /// Create a compile-time constant; no storage, no code.
    pub fn create_const(&mut self, name: &str, value: i16) -> Result<Option<String>> {
        let collision = self.check_new(name)?;
        self.push_var(name, BaseType::Word, true, Shape::Scalar, value);
        Ok(collision)
    }

    /// Add a formal parameter to the frame under construction. Parameters
    /// sit above the frame pointer (past the return address and saved FP),
    /// and are created left to right, so each new one shifts those already
    /// recorded by its own width.
    pub fn create_param(&mut self, name: &str, ty: BaseType, byref: bool) -> Result<Option<String>> {
        let collision = self.check_new(name)?;
        let width: i16 = if byref { 2 } else { ty.size() as i16 };
        let local_start = self.local_start();
        for var in self.vars.iter_mut().skip(local_start) {
            var.addr += width;
        }
        let shape = if byref { Shape::ArrayRef } else { Shape::Scalar };
        // Skip over the return address and the saved frame pointer.
        self.push_var(name, ty, false, shape, 4);
        Ok(collision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::ErrorCode;

    #[test]
    fn test_scoped_lookup() {
        let mut tab = VarTab::new();
        tab.create_scalar("glob", BaseType::Word, false, 1).unwrap();
        tab.enter_scope();
        tab.create_scalar("loc", BaseType::Word, false, 2).unwrap();
        let (index, local) = tab.find("loc", false).unwrap();
        assert!(local);
        assert_eq!(tab.heap.read_word(tab.get(index).addr as u16).unwrap(), 2);
        let (_, local) = tab.find("glob", false).unwrap();
        assert!(!local);
        assert!(tab.find("loc", true).is_some());
        assert!(tab.find("glob", true).is_none());
        tab.leave_scope();
        assert!(tab.find("loc", false).is_none());
    }

    #[test]
    fn test_scope_restores_arena() {
        let mut tab = VarTab::new();
        tab.create_scalar("a", BaseType::Word, false, 0).unwrap();
        let mark = tab.heap.mark();
        tab.enter_scope();
        tab.create_array("b", BaseType::Byte, 100).unwrap();
        tab.leave_scope();
        assert_eq!(tab.heap.mark(), mark);
    }

    #[test]
    fn test_redefine_same_frame() {
        let mut tab = VarTab::new();
        tab.create_scalar("x", BaseType::Word, false, 0).unwrap();
        let err = tab.create_scalar("x", BaseType::Byte, false, 0).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Redefined);
        // Shadowing in an inner frame is fine.
        tab.enter_scope();
        tab.create_scalar("x", BaseType::Byte, false, 9).unwrap();
    }

    #[test]
    fn test_truncation_collision() {
        let mut tab = VarTab::new();
        tab.create_scalar("count", BaseType::Word, false, 0).unwrap();
        let err = tab.create_scalar("counter", BaseType::Word, false, 0);
        // Same 4-char key: this is a redefinition, not a fresh name.
        assert_eq!(err.unwrap_err().code(), ErrorCode::Redefined);
        tab.enter_scope();
        let collision = tab.create_scalar("counter", BaseType::Word, false, 0).unwrap();
        assert_eq!(collision.as_deref(), Some("count"));
    }

    #[test]
    fn test_param_offsets_shift() {
        let mut tab = VarTab::new();
        tab.enter_scope();
        tab.create_param("a", BaseType::Word, false).unwrap();
        tab.create_param("b", BaseType::Byte, false).unwrap();
        tab.create_param("c", BaseType::Word, true).unwrap();
        // Pushed left to right: a sits deepest, above b, above c.
        let (a, _) = tab.find("a", true).unwrap();
        let (b, _) = tab.find("b", true).unwrap();
        let (c, _) = tab.find("c", true).unwrap();
        assert_eq!(tab.get(a).addr, 4 + 1 + 2);
        assert_eq!(tab.get(b).addr, 4 + 2);
        assert_eq!(tab.get(c).addr, 4);
        assert_eq!(tab.get(c).shape, Shape::ArrayRef);
    }
}
