#[derive(Debug, Clone, PartialEq)]
pub struct Error {
    code: ErrorCode,
    line: Option<u16>,
    detail: Option<String>,
}

#[macro_export]
macro_rules! error {
    ($err:ident) => {
        $crate::lang::Error::from_code($crate::lang::ErrorCode::$err)
    };
    ($err:ident; $detail:expr) => {
        $crate::lang::Error::from_code($crate::lang::ErrorCode::$err).message($detail)
    };
}

impl Error {
    pub fn from_code(code: ErrorCode) -> Error {
        Error {
            code,
            line: None,
            detail: None,
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(mut self, detail: &str) -> Error {
        self.detail = Some(detail.to_string());
        self
    }

    /// Tag the error with a 1-based source line, keeping an existing tag.
    pub fn in_line(mut self, line: u16) -> Error {
        if self.line.is_none() {
            self.line = Some(line);
        }
        self
    }

    pub fn line(&self) -> Option<u16> {
        self.line
    }

    /// Fatal errors unwind everything; the prompt loop answers with `Restart`.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::TooComplex | ErrorCode::StackOverflow | ErrorCode::NoMemory
        )
    }
}

/// One variant per recoverable condition. The numbering is not part of any
/// wire contract; only the short messages are user-visible.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ErrorCode {
    NoIf,
    NoFor,
    NoWhile,
    NoSub,
    StackOverflow,
    TooComplex,
    ExpectedVar,
    Redefined,
    ExpectedChar,
    UnexpectedExtra,
    BadDimension,
    BadSubscript,
    RanIntoSub,
    BadString,
    File,
    BadLine,
    BadExpression,
    BadNumber,
    Argument,
    Type,
    DivideByZero,
    BadValue,
    NotConstant,
    AssignToConst,
    InitializerTooLong,
    Link,
    NoMemory,
}

impl ErrorCode {
    fn as_str(&self) -> &'static str {
        use ErrorCode::*;
        match self {
            NoIf => "no if",
            NoFor => "no for",
            NoWhile => "no while",
            NoSub => "no sub",
            StackOverflow => "stack",
            TooComplex => "complex",
            ExpectedVar => "expect var",
            Redefined => "redef",
            ExpectedChar => "expected ",
            UnexpectedExtra => "extra",
            BadDimension => "bad dim",
            BadSubscript => "bad idx",
            RanIntoSub => "ran into sub",
            BadString => "bad str",
            File => "file",
            BadLine => "bad line#",
            BadExpression => "bad expr",
            BadNumber => "bad num",
            Argument => "arg",
            Type => "type",
            DivideByZero => "div/0",
            BadValue => "bad val",
            NotConstant => "not const",
            AssignToConst => "const",
            InitializerTooLong => "too long",
            Link => "link",
            NoMemory => "no mem",
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.code.as_str())?;
        if let Some(detail) = &self.detail {
            write!(f, "{}", detail)?;
        }
        Ok(())
    }
}
