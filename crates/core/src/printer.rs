use std::{fmt::Display, io::Write};

use anyhow::Context;
use clap::Args;
use serde::Serialize;

#[derive(Debug, Args)]
pub struct PrinterArgs {
    /// The output format to use. Valid options are "plain", "json", and "binary". Default is "plain".
    #[arg(long, short = 'o', default_value_t = Format::default())]
    pub output: Format,

    /// Indent JSON output. Ignored by the other formats
    #[arg(long)]
    pub pretty: bool,
}

impl PrinterArgs {
    /// Print a batch of records to the given writer in the selected format.
    pub fn print<T, W>(&self, records: &[T], writer: &mut W) -> anyhow::Result<()>
    where
        T: Serialize + Display,
        W: Write,
    {
        match self.output {
            Format::Plain => self.output.print_plain(records.iter(), writer),
            Format::Json if self.pretty => {
                serde_json::to_writer_pretty(&mut *writer, records)
                    .context("JSON serialization failed")?;
                writeln!(writer)?;
                Ok(())
            }
            Format::Json | Format::Binary => self.output.print_structured(records, writer),
        }
    }
}

/// Supported output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    #[default]
    Plain,
    Json,
    Binary,
}

impl std::str::FromStr for Format {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "plain" => Ok(Format::Plain),
            "json" => Ok(Format::Json),
            "binary" | "cbor" => Ok(Format::Binary),
            _ => Err(anyhow::anyhow!("Unknown format: {}", s)),
        }
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Format::Plain => "plain",
            Format::Json => "json",
            Format::Binary => "binary",
        };
        write!(f, "{}", s)
    }
}

impl Format {
    /// Serialize the data to the writer. JSON output ends with a newline so it plays well with
    /// line-oriented tools; CBOR is written as is.
    pub fn print_structured<S: Serialize + ?Sized, W: Write>(
        &self,
        data: &S,
        writer: &mut W,
    ) -> anyhow::Result<()> {
        match self {
            Format::Json => {
                serde_json::to_writer(&mut *writer, data).context("JSON serialization failed")?;
                writeln!(writer)?;
                Ok(())
            }
            Format::Binary => {
                ciborium::into_writer(data, writer).context("CBOR serialization failed")
            }
            Format::Plain => {
                anyhow::bail!("Plain format not supported")
            }
        }
    }

    /// Print one line per item. Fails for the structured formats.
    pub fn print_plain<T, D, W>(&self, data: T, writer: &mut W) -> anyhow::Result<()>
    where
        T: Iterator<Item = D>,
        D: Display,
        W: Write,
    {
        match self {
            Format::Plain => {
                for item in data {
                    writeln!(writer, "{}", item)?;
                }
                Ok(())
            }
            _ => {
                anyhow::bail!("Non-plain format not supported for plain text output")
            }
        }
    }
}
