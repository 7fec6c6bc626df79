use std::io::{self, Write};

use mediatranslation_client::TranslationEvent;

/// Prints interim translations over one another and each final one on its
/// own line.
pub struct TranslationPrinter<W> {
    out: W,
    /// Columns the current interim line occupies.
    interim_width: usize,
}

impl<W: Write> TranslationPrinter<W> {
    pub const fn new(out: W) -> Self {
        Self {
            out,
            interim_width: 0,
        }
    }

    pub fn print(&mut self, event: &TranslationEvent) -> io::Result<()> {
        match event {
            TranslationEvent::Translation { text, is_final } => {
                let width = text.chars().count();
                let pad = self.interim_width.saturating_sub(width);
                write!(self.out, "\r{text}{:pad$}", "")?;
                if *is_final {
                    writeln!(self.out)?;
                    self.interim_width = 0;
                } else {
                    self.interim_width = width.max(self.interim_width);
                }
            }
            TranslationEvent::EndOfSingleUtterance => self.finish()?,
        }
        self.out.flush()
    }

    /// Ends a dangling interim line.
    pub fn finish(&mut self) -> io::Result<()> {
        if self.interim_width > 0 {
            writeln!(self.out)?;
            self.interim_width = 0;
        }
        self.out.flush()
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }
}
