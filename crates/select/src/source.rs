//! Pull-based line sources for interactive and streamed selection input.

use std::io::{self, BufRead, Write};

/// Which prompt precedes a requested line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompt {
    /// Start of a new statement
    Statement,
    /// Continuation of a line ending in `\`
    Continuation,
}

impl Prompt {
    pub fn text(&self) -> &'static str {
        match self {
            Prompt::Statement => "> ",
            Prompt::Continuation => "... ",
        }
    }
}

/// Source of selection text, one physical line at a time.
pub trait LineSource {
    /// Next line without its terminator, or `None` at end of input.
    fn next_line(&mut self, prompt: Prompt) -> io::Result<Option<String>>;

    /// Interactive sources get errors reported after every line.
    fn is_interactive(&self) -> bool {
        false
    }

    /// Show an error to the user.
    fn report(&mut self, message: &str) {
        log::warn!("{}", message);
    }
}

/// Lines from any buffered reader.
#[derive(Debug)]
pub struct ReaderSource<R> {
    reader: R,
}

impl<R: BufRead> ReaderSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: BufRead> LineSource for ReaderSource<R> {
    fn next_line(&mut self, _prompt: Prompt) -> io::Result<Option<String>> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }
        Ok(Some(line))
    }
}

/// Lines from standard input.
pub type StdinSource = ReaderSource<io::StdinLock<'static>>;

impl StdinSource {
    pub fn stdin() -> Self {
        ReaderSource::new(io::stdin().lock())
    }
}

/// Decorator that echoes prompts and errors to a writer.
#[derive(Debug)]
pub struct Interactive<S, W> {
    inner: S,
    out: W,
}

impl<S: LineSource, W: Write> Interactive<S, W> {
    pub fn new(inner: S, out: W) -> Self {
        Self { inner, out }
    }

    pub fn into_inner(self) -> (S, W) {
        (self.inner, self.out)
    }
}

impl<S: LineSource, W: Write> LineSource for Interactive<S, W> {
    fn next_line(&mut self, prompt: Prompt) -> io::Result<Option<String>> {
        self.out.write_all(prompt.text().as_bytes())?;
        self.out.flush()?;
        let line = self.inner.next_line(prompt)?;
        if line.is_none() {
            writeln!(self.out)?;
        }
        Ok(line)
    }

    fn is_interactive(&self) -> bool {
        true
    }

    fn report(&mut self, message: &str) {
        if let Err(e) = writeln!(self.out, "{}", message) {
            log::warn!("failed to report selection error: {}", e);
        }
    }
}
