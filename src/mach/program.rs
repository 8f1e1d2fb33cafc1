use crate::error;
use crate::lang::Error;
use std::io::{BufRead, BufReader, Write};

type Result<T> = std::result::Result<T, Error>;

/// Longest storable source line.
pub const MAX_LINE: usize = 254;

/// ## Program store
///
/// The ordered source lines, addressed 1-based by the editor commands.
/// Loading replaces the store; saving writes lines with the platform
/// newline.
#[derive(Debug, Default)]
pub struct Program {
    lines: Vec<String>,
}

impl Program {
    pub fn new() -> Program {
        Program::default()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// 0-based fetch, used by the statement loop.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.lines.get(index).map(|s| s.as_str())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.lines.iter()
    }

    fn validate(text: &str) -> Result<()> {
        if text.len() > MAX_LINE {
            return Err(error!(BadLine));
        }
        Ok(())
    }

    /// Insert at a 0-based index (0 = new first line, `len` = append at
    /// end).
    pub fn insert(&mut self, index: usize, text: &str) -> Result<()> {
        Program::validate(text)?;
        let index = index.min(self.lines.len());
        self.lines.insert(index, text.to_string());
        Ok(())
    }

    /// Delete an inclusive 1-based range. Out-of-range bounds are
    /// tolerated; an inverted range deletes nothing.
    pub fn delete(&mut self, start: i16, end: i16) {
        if end < start || self.lines.is_empty() {
            return;
        }
        let start = (start.max(1) as usize) - 1;
        let end = (end as usize).min(self.lines.len());
        if start < end {
            self.lines.drain(start..end);
        }
    }

    /// Replace a 1-based line.
    pub fn replace(&mut self, line: usize, text: &str) -> Result<()> {
        Program::validate(text)?;
        if line == 0 || line > self.lines.len() {
            return Err(error!(BadLine));
        }
        self.lines[line - 1] = text.to_string();
        Ok(())
    }

    /// Load a file, replacing the store. Line terminators are trimmed.
    /// Returns the number of lines read.
    pub fn load(&mut self, filename: &str) -> Result<usize> {
        let file = std::fs::File::open(filename).map_err(|_| error!(File))?;
        let mut lines = vec![];
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|_| error!(File))?;
            let line = line.trim_end_matches(&['\r', '\n'][..]);
            Program::validate(line)?;
            lines.push(line.to_string());
        }
        self.lines = lines;
        Ok(self.lines.len())
    }

    pub fn save(&self, filename: &str) -> Result<()> {
        let mut file = std::fs::File::create(filename).map_err(|_| error!(File))?;
        for line in &self.lines {
            writeln!(file, "{}", line).map_err(|_| error!(File))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(lines: &[&str]) -> Program {
        let mut p = Program::new();
        for line in lines {
            p.insert(p.len(), line).unwrap();
        }
        p
    }

    #[test]
    fn test_insert_delete() {
        let mut p = store(&["one", "two", "three"]);
        p.insert(0, "zero").unwrap();
        assert_eq!(p.get(0), Some("zero"));
        p.delete(2, 3);
        assert_eq!(p.len(), 2);
        assert_eq!(p.get(1), Some("three"));
        p.delete(5, 9);
        assert_eq!(p.len(), 2);
        p.delete(2, 1);
        assert_eq!(p.len(), 2);
    }

    #[test]
    fn test_replace() {
        let mut p = store(&["one"]);
        p.replace(1, "uno").unwrap();
        assert_eq!(p.get(0), Some("uno"));
        assert!(p.replace(2, "dos").is_err());
    }

    #[test]
    fn test_too_long() {
        let mut p = Program::new();
        let long = "x".repeat(MAX_LINE + 1);
        assert!(p.insert(0, &long).is_err());
    }
}
