use eightball::mach::{Runtime, ScriptConsole};
use std::cell::RefCell;
use std::rc::Rc;

pub struct Session {
    runtime: Runtime,
    output: Rc<RefCell<String>>,
}

impl Session {
    pub fn new() -> Session {
        Session::scripted(&[], &[])
    }

    /// A session with canned keyboard input for `kbd.ln` / `kbd.ch`.
    pub fn scripted(lines: &[&str], keys: &[u8]) -> Session {
        let (mut console, output) = ScriptConsole::new();
        for line in lines {
            console.type_line(line);
        }
        for key in keys {
            console.type_key(*key);
        }
        Session {
            runtime: Runtime::new(Box::new(console)),
            output,
        }
    }

    /// Feed one prompt line and return what it printed.
    pub fn enter(&mut self, line: &str) -> String {
        self.runtime.enter(line);
        let out = self.output.borrow().clone();
        self.output.borrow_mut().clear();
        out
    }

    /// Store a program through the editor, as a user would.
    pub fn program(&mut self, lines: &[&str]) {
        self.enter(":i 1");
        for line in lines {
            self.enter(line);
        }
        self.enter(".");
    }

    pub fn run(&mut self) -> String {
        self.enter("run")
    }

    pub fn bytecode(&self) -> &[u8] {
        self.runtime.bytecode()
    }
}
