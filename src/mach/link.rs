use super::emit::Emitter;
use super::Address;
use crate::error;
use crate::lang::Error;

type Result<T> = std::result::Result<T, Error>;

/// Subroutine names are significant to 8 characters.
pub const SUB_NAME_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubName([u8; SUB_NAME_LEN]);

impl SubName {
    pub fn new(name: &str) -> SubName {
        let mut key = [0u8; SUB_NAME_LEN];
        for (slot, byte) in key.iter_mut().zip(name.bytes()) {
            *slot = byte;
        }
        SubName(key)
    }
}

impl std::fmt::Display for SubName {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        for &byte in self.0.iter().take_while(|&&b| b != 0) {
            write!(f, "{}", byte as char)?;
        }
        Ok(())
    }
}

#[derive(Debug)]
struct SubRecord {
    name: SubName,
    /// Untruncated spelling, kept to diagnose key collisions.
    full: String,
    addr: Address,
}

/// ## Subroutine linkage
///
/// Two lists built during compilation: entry points of `sub` definitions,
/// and the operand addresses of emitted `JSRIMM 0xffff` call sites. Both
/// are complete before `link` runs, once, after the final `END`.
#[derive(Debug, Default)]
pub struct Linker {
    subs: Vec<SubRecord>,
    calls: Vec<(SubName, Address)>,
}

impl Linker {
    pub fn new() -> Linker {
        Linker::default()
    }

    pub fn clear(&mut self) {
        self.subs.clear();
        self.calls.clear();
    }

    /// Record a definition. Returns the spelling of a previously defined
    /// subroutine whose 8-character key collides, if any.
    pub fn define(&mut self, name: &str, addr: Address) -> Option<String> {
        let key = SubName::new(name);
        let collision = self
            .subs
            .iter()
            .find(|s| s.name == key && s.full != name)
            .map(|s| s.full.clone());
        self.subs.push(SubRecord {
            name: key,
            full: name.to_string(),
            addr,
        });
        collision
    }

    /// Record a call site: `addr` is the target address of the 16-bit
    /// operand to patch.
    pub fn call_site(&mut self, name: &str, addr: Address) {
        self.calls.push((SubName::new(name), addr));
    }

    /// Patch every call site with its definition's entry point.
    pub fn link(&self, emitter: &mut Emitter) -> Result<()> {
        for (name, call_addr) in &self.calls {
            let sub = self
                .subs
                .iter()
                .find(|s| s.name == *name)
                .ok_or_else(|| error!(Link; &name.to_string()))?;
            emitter.fixup(*call_addr, sub.addr);
        }
        Ok(())
    }
}
