use crate::error;
use crate::lang::Error;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

type Result<T> = std::result::Result<T, Error>;

/// Console and keyboard services the machine depends on. The interactive
/// front end implements this over the terminal; tests script it.
pub trait Console {
    fn print(&mut self, s: &str);

    fn put_char(&mut self, ch: u8);

    /// Read a whole line (`kbd.ln`).
    fn get_line(&mut self) -> Result<String>;

    /// Block for a single keypress (`kbd.ch`).
    fn get_char(&mut self) -> Result<u8>;

    /// Poll and clear the user-interrupt flag.
    fn interrupted(&mut self) -> bool;
}

/// Scripted console: canned keyboard input, captured output. Used by the
/// test suites and anywhere a terminal is not wanted.
pub struct ScriptConsole {
    input: VecDeque<String>,
    keys: VecDeque<u8>,
    output: Rc<RefCell<String>>,
}

impl ScriptConsole {
    pub fn new() -> (ScriptConsole, Rc<RefCell<String>>) {
        let output = Rc::new(RefCell::new(String::new()));
        (
            ScriptConsole {
                input: VecDeque::new(),
                keys: VecDeque::new(),
                output: Rc::clone(&output),
            },
            output,
        )
    }

    pub fn type_line(&mut self, line: &str) {
        self.input.push_back(line.to_string());
    }

    pub fn type_key(&mut self, key: u8) {
        self.keys.push_back(key);
    }
}

impl Console for ScriptConsole {
    fn print(&mut self, s: &str) {
        self.output.borrow_mut().push_str(s);
    }

    fn put_char(&mut self, ch: u8) {
        self.output.borrow_mut().push(ch as char);
    }

    fn get_line(&mut self) -> Result<String> {
        self.input.pop_front().ok_or_else(|| error!(File))
    }

    fn get_char(&mut self) -> Result<u8> {
        self.keys.pop_front().ok_or_else(|| error!(File))
    }

    fn interrupted(&mut self) -> bool {
        false
    }
}
