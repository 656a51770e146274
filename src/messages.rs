//! Provides the diagnostics of a build.
//!
//! Data quality problems found while reading source records are not fatal. They are reported
//! via [Diagnostics::error] which decorates the message with the current source position, logs
//! it and counts it. Fatal problems are plain `anyhow::Error`s which are decorated via
//! [Diagnostics::fatal].
use std::fmt::Display;

/// Keeps track of the current source position and of the reported errors.
#[derive(Default)]
pub struct Diagnostics {
    source: Option<String>,
    line: usize,
    errors: usize,
    last_progress: usize,
}

impl Diagnostics {
    /// Creates a new and empty set of diagnostics.
    pub fn new() -> Self {
        Diagnostics::default()
    }

    /// Sets the name of the source currently being processed.
    pub fn set_source(&mut self, name: impl Into<String>) {
        self.source = Some(name.into());
        self.line = 0;
    }

    /// Sets the line number (record number) currently being processed.
    pub fn set_line(&mut self, line: usize) {
        self.line = line;
    }

    /// Returns the current position as "source:line".
    ///
    /// # Example
    ///
    /// ```
    /// # use buildmap::messages::Diagnostics;
    /// let mut diagnostics = Diagnostics::new();
    /// assert_eq!(diagnostics.position(), "-");
    ///
    /// diagnostics.set_source("tgr06075.csv");
    /// diagnostics.set_line(42);
    /// assert_eq!(diagnostics.position(), "tgr06075.csv:42");
    /// ```
    pub fn position(&self) -> String {
        match &self.source {
            Some(source) if self.line > 0 => format!("{}:{}", source, self.line),
            Some(source) => source.clone(),
            None => "-".to_owned(),
        }
    }

    /// Reports a recoverable error for the current position.
    pub fn error(&mut self, message: impl Display) {
        self.errors += 1;
        log::error!("{}: {}", self.position(), message);
    }

    /// Decorates a fatal error with the current position.
    pub fn fatal(&self, error: anyhow::Error) -> anyhow::Error {
        error.context(format!("fatal error at {}", self.position()))
    }

    /// Returns the number of errors reported so far.
    pub fn errors(&self) -> usize {
        self.errors
    }

    /// Reports the progress of a long running phase.
    ///
    /// Only every ten percent a message is logged.
    pub fn progress(&mut self, done: usize, total: usize) {
        if total == 0 {
            return;
        }
        let percent = done * 100 / total;
        if percent / 10 != self.last_progress / 10 || done == total {
            log::debug!("{}: {}% done ({} of {})", self.position(), percent, done, total);
        }
        self.last_progress = percent;
    }

    /// Clears all state so that the next source file can be processed.
    pub fn reset(&mut self) {
        *self = Diagnostics::default();
    }
}

#[cfg(test)]
mod tests {
    use crate::messages::Diagnostics;

    #[test]
    fn errors_are_counted() {
        let mut diagnostics = Diagnostics::new();
        diagnostics.set_source("test");
        diagnostics.error("duplicated no-address line");
        diagnostics.error("invalid record");
        assert_eq!(diagnostics.errors(), 2);

        let error = diagnostics.fatal(anyhow::anyhow!("no more room"));
        assert_eq!(format!("{:#}", error), "fatal error at test: no more room");

        diagnostics.reset();
        assert_eq!(diagnostics.errors(), 0);
        assert_eq!(diagnostics.position(), "-");
    }
}
