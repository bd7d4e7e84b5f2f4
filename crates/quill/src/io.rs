//! Output handling for the `print` builtin.

use std::{
    borrow::Cow,
    cell::RefCell,
    io::{self, Write as _},
};

/// Trait for handling output from the `print()` builtin function.
///
/// Implement this trait to capture or redirect print output from embedded
/// scripts. The default implementation `StdPrint` writes to stdout.
pub trait PrintWriter {
    /// Called once for each formatted argument passed to `print()`.
    ///
    /// Writes only the given argument's text; separators and the trailing
    /// newline are emitted via [`PrintWriter::stdout_push`].
    fn stdout_write(&mut self, output: Cow<'_, str>);

    /// Adds a single character to stdout, generally a separator space or
    /// the final newline.
    fn stdout_push(&mut self, end: char);
}

thread_local! {
    /// Thread-local stdout buffer for `StdPrint`, flushed when the writer
    /// drops so script output appears in one contiguous block.
    static STDOUT_BUFFER: RefCell<String> = const { RefCell::new(String::new()) };
}

/// Default `PrintWriter` that writes to stdout.
#[derive(Debug)]
pub struct StdPrint;

impl PrintWriter for StdPrint {
    fn stdout_write(&mut self, output: Cow<'_, str>) {
        STDOUT_BUFFER.with(|buffer| buffer.borrow_mut().push_str(&output));
    }

    fn stdout_push(&mut self, end: char) {
        STDOUT_BUFFER.with(|buffer| buffer.borrow_mut().push(end));
    }
}

impl Drop for StdPrint {
    fn drop(&mut self) {
        STDOUT_BUFFER.with(|buffer| {
            let mut buffer = buffer.borrow_mut();
            if buffer.is_empty() {
                return;
            }
            let _ = io::stdout().write_all(buffer.as_bytes());
            let _ = io::stdout().flush();
            buffer.clear();
        });
    }
}

/// A `PrintWriter` that collects all output into a string.
///
/// Useful for testing or capturing print output programmatically.
#[derive(Debug, Default)]
pub struct CollectStringPrint(String);

impl CollectStringPrint {
    #[must_use]
    pub fn new() -> Self {
        Self(String::new())
    }

    /// Returns the collected output as a string slice.
    #[must_use]
    pub fn output(&self) -> &str {
        self.0.as_str()
    }

    /// Consumes the writer and returns the collected output.
    #[must_use]
    pub fn into_output(self) -> String {
        self.0
    }
}

impl PrintWriter for CollectStringPrint {
    fn stdout_write(&mut self, output: Cow<'_, str>) {
        self.0.push_str(&output);
    }

    fn stdout_push(&mut self, end: char) {
        self.0.push(end);
    }
}

/// `PrintWriter` that ignores all output.
#[derive(Debug, Default)]
pub struct NoPrint;

impl PrintWriter for NoPrint {
    fn stdout_write(&mut self, _output: Cow<'_, str>) {}

    fn stdout_push(&mut self, _end: char) {}
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_collect_string_print() {
        let mut print = CollectStringPrint::new();
        print.stdout_write(Cow::Borrowed("hello"));
        print.stdout_push(' ');
        print.stdout_write(Cow::Borrowed("world"));
        print.stdout_push('\n');
        assert_eq!(print.output(), "hello world\n");
        assert_eq!(print.into_output(), "hello world\n");
    }
}
