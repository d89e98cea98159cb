//! Line-based prompt/response with the operator.

use std::fmt::Display;
use std::io::{self, BufRead, BufReader, Write};

use crate::error::{Error, Result};

/// Terminal the troubleshooting dialogue runs over.
pub struct Console {
    input: Box<dyn BufRead + Send>,
    output: Box<dyn Write + Send>,
}

impl Console {
    pub fn new(input: impl BufRead + Send + 'static, output: impl Write + Send + 'static) -> Self {
        Self {
            input: Box::new(input),
            output: Box::new(output),
        }
    }

    pub fn stdio() -> Self {
        Self::new(BufReader::new(io::stdin()), io::stdout())
    }

    /// Writes one line to the operator.
    pub fn say(&mut self, line: impl Display) -> Result<()> {
        writeln!(self.output, "{line}")?;
        self.output.flush()?;
        Ok(())
    }

    /// Writes a blank line.
    pub fn blank(&mut self) -> Result<()> {
        self.say("")
    }

    /// Reads one trimmed line. A closed input is an error, not an empty answer.
    pub fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "input closed").into());
        }
        Ok(line.trim().to_string())
    }

    pub fn read_index(&mut self) -> Result<usize> {
        let answer = self.read_line()?;
        answer
            .parse::<usize>()
            .map_err(|_| Error::invalid_input(format!("{answer:?} is not a list number")))
    }

    /// Asks a yes/no question; anything but `y`/`yes` counts as no.
    pub fn confirm(&mut self, question: &str) -> Result<bool> {
        self.say(format!("{question} [y/N]"))?;
        let answer = self.read_line()?.to_ascii_lowercase();
        Ok(matches!(answer.as_str(), "y" | "yes"))
    }

    /// Prints `items` numbered from 0 and reads the operator's pick.
    pub fn choose<T>(
        &mut self,
        prompt: &str,
        items: &[T],
        label: impl Fn(&T) -> String,
    ) -> Result<usize> {
        for (i, item) in items.iter().enumerate() {
            self.say(format!("{i}) {}", label(item)))?;
        }
        self.say(prompt)?;
        let index = self.read_index()?;
        if index >= items.len() {
            return Err(Error::OutOfRange {
                index,
                len: items.len(),
            });
        }
        Ok(index)
    }
}
