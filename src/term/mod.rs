/*!
## Terminal Module

Interactive front end: prompt, history, interrupt delivery and raw key
input, wired into the machine through the `Console` trait.

*/

extern crate ansi_term;
extern crate ctrlc;
extern crate linefeed;
extern crate mortal;

use crate::error;
use crate::lang::Error;
use crate::mach::{Console, Runtime};
use ansi_term::Style;
use linefeed::{Interface, ReadResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub fn main() {
    if std::env::args().count() > 2 {
        println!("Usage: eightball [FILENAME]");
        return;
    }
    let mut args = std::env::args();
    let _executable = args.next();
    let filename = match args.next() {
        Some(f) => f,
        _ => "".into(),
    };
    let interrupted = Arc::new(AtomicBool::new(false));
    let int_moved = interrupted.clone();
    ctrlc::set_handler(move || {
        int_moved.store(true, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl-C handler");
    match main_loop(interrupted, filename) {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            eprintln!("{}", error);
            std::process::exit(1);
        }
    }
}

fn main_loop(
    interrupted: Arc<AtomicBool>,
    filename: String,
) -> std::io::Result<i32> {
    let interface = Arc::new(Interface::new("eightball")?);
    interface.set_prompt("> ")?;
    let console = TermConsole {
        interface: Arc::clone(&interface),
        terminal: mortal::Terminal::new()?,
        interrupted: Arc::clone(&interrupted),
    };
    let mut runtime = Runtime::new(Box::new(console));

    interface.write_fmt(format_args!(
        "{}\n\n",
        Style::new()
            .bold()
            .paint("      ***    EightBall    ***      ")
    ))?;

    if !filename.is_empty() {
        match runtime.load_program(&filename) {
            Ok(count) => interface.write_fmt(format_args!("{} lines\n", count))?,
            Err(error) => interface.write_fmt(format_args!(
                "{}\n",
                Style::new().bold().paint(format!("?{}", error))
            ))?,
        }
    }

    loop {
        // A ^C at the prompt is stale by the time we read again.
        interrupted.store(false, Ordering::SeqCst);
        let line = match interface.read_line()? {
            ReadResult::Input(line) => line,
            ReadResult::Signal(_) => continue,
            ReadResult::Eof => return Ok(0),
        };
        if !line.trim().is_empty() {
            interface.add_history_unique(line.clone());
        }
        runtime.enter(&line);
        if let Some(code) = runtime.finished() {
            return Ok(code);
        }
    }
}

struct TermConsole {
    interface: Arc<Interface<linefeed::DefaultTerminal>>,
    terminal: mortal::Terminal,
    interrupted: Arc<AtomicBool>,
}

impl Console for TermConsole {
    fn print(&mut self, s: &str) {
        let _ = self.interface.write_fmt(format_args!("{}", s));
    }

    fn put_char(&mut self, ch: u8) {
        let _ = self
            .interface
            .write_fmt(format_args!("{}", ch as char));
    }

    fn get_line(&mut self) -> Result<String, Error> {
        let saved = self.interface.set_prompt("");
        let result = match self.interface.read_line() {
            Ok(ReadResult::Input(line)) => Ok(line),
            Ok(_) | Err(_) => Err(error!(File)),
        };
        if saved.is_ok() {
            let _ = self.interface.set_prompt("> ");
        }
        result
    }

    fn get_char(&mut self) -> Result<u8, Error> {
        loop {
            if self.interrupted.load(Ordering::SeqCst) {
                // Let the statement loop see the break.
                return Ok(0);
            }
            match self
                .terminal
                .read_event(Some(Duration::from_millis(10)))
            {
                Ok(Some(mortal::terminal::Event::Key(key))) => {
                    use mortal::terminal::Key::*;
                    let ch = match key {
                        Backspace => 0x08,
                        Enter => 0x0d,
                        Escape => 0x1b,
                        Tab => 0x09,
                        Char(c) if c.is_ascii() => c as u8,
                        _ => continue,
                    };
                    return Ok(ch);
                }
                Ok(_) => continue,
                Err(_) => return Err(error!(File)),
            }
        }
    }

    fn interrupted(&mut self) -> bool {
        self.interrupted.swap(false, Ordering::SeqCst)
    }
}
