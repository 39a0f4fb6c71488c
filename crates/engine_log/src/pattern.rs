//! spdlog-style line patterns.
//!
//! | specifier | output |
//! |---|---|
//! | `%Y` `%m` `%d` | year, month, day |
//! | `%H` `%M` `%S` | hour, minute, second |
//! | `%e` `%f` `%F` | milli-, micro-, nanoseconds of the second |
//! | `%l` `%L` | level name (`info`, `warning`, ...), short level (`I`) |
//! | `%n` | service name |
//! | `%t` `%P` | thread id, process id |
//! | `%@` `%s` `%#` | `file:line`, file name, line |
//! | `%v` | message and fields |
//! | `%^` `%$` | start and end of the level-coloured range |
//! | `%%` | `%` |
//!
//! A width pads a field: `%8l` aligns right, `%-8l` left, `%=8l` centred.

use std::fmt::{self, Write as _};
use std::path::Path;

use chrono::{DateTime, Datelike, Local, Timelike};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

use crate::config::DEFAULT_PATTERN;
use crate::error::FormatError;

const RESET: &str = "\x1b[m";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    Millis,
    Micros,
    Nanos,
    Level,
    LevelShort,
    Service,
    Thread,
    Process,
    Source,
    File,
    Line,
    Message,
}

impl Field {
    fn from_specifier(specifier: char) -> Option<Self> {
        Some(match specifier {
            'Y' => Field::Year,
            'm' => Field::Month,
            'd' => Field::Day,
            'H' => Field::Hour,
            'M' => Field::Minute,
            'S' => Field::Second,
            'e' => Field::Millis,
            'f' => Field::Micros,
            'F' => Field::Nanos,
            'l' => Field::Level,
            'L' => Field::LevelShort,
            'n' => Field::Service,
            't' => Field::Thread,
            'P' => Field::Process,
            '@' => Field::Source,
            's' => Field::File,
            '#' => Field::Line,
            'v' => Field::Message,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Align {
    Left,
    Right,
    Center,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pad {
    width: usize,
    align: Align,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Field { field: Field, pad: Option<Pad> },
    ColorStart,
    ColorEnd,
}

/// A parsed line pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    tokens: Vec<Token>,
}

impl Pattern {
    /// Parse `pattern`.
    ///
    /// # Errors
    ///
    /// Fails on an unknown specifier, a trailing `%` or an alignment flag
    /// without a width.
    pub fn parse(pattern: &str) -> Result<Self, FormatError> {
        let mut tokens = Vec::new();
        let mut literal = String::new();
        let mut chars = pattern.char_indices().peekable();

        while let Some((position, c)) = chars.next() {
            if c != '%' {
                literal.push(c);
                continue;
            }

            let align = match chars.peek() {
                Some((_, '-')) => Some(Align::Left),
                Some((_, '=')) => Some(Align::Center),
                _ => None,
            };
            if align.is_some() {
                chars.next();
            }

            let mut width = None;
            while let Some(&(_, digit)) = chars.peek() {
                let Some(value) = digit.to_digit(10) else {
                    break;
                };
                let value = value as usize;
                width = Some(width.unwrap_or(0usize).saturating_mul(10).saturating_add(value));
                chars.next();
            }
            if align.is_some() && width.is_none() {
                return Err(FormatError::MissingWidth { position });
            }

            let Some((_, specifier)) = chars.next() else {
                return Err(FormatError::Dangling { position });
            };
            let pad = width.map(|width| Pad {
                width,
                align: align.unwrap_or(Align::Right),
            });

            let token = match specifier {
                '%' => {
                    literal.push('%');
                    continue;
                }
                '^' => Token::ColorStart,
                '$' => Token::ColorEnd,
                _ => match Field::from_specifier(specifier) {
                    Some(field) => Token::Field { field, pad },
                    None => {
                        return Err(FormatError::UnknownSpecifier {
                            specifier,
                            position,
                        });
                    }
                },
            };
            if !literal.is_empty() {
                tokens.push(Token::Literal(std::mem::take(&mut literal)));
            }
            tokens.push(token);
        }

        if !literal.is_empty() {
            tokens.push(Token::Literal(literal));
        }
        Ok(Self { tokens })
    }
}

impl Default for Pattern {
    fn default() -> Self {
        Self::parse(DEFAULT_PATTERN).unwrap_or_else(|_| Self {
            tokens: vec![Token::Field {
                field: Field::Message,
                pad: None,
            }],
        })
    }
}

/// Formats events with a [`Pattern`].
#[derive(Debug, Clone)]
pub struct PatternFormatter {
    pattern: Pattern,
    service: String,
}

impl PatternFormatter {
    #[must_use]
    pub fn new(pattern: Pattern, service: impl Into<String>) -> Self {
        Self {
            pattern,
            service: service.into(),
        }
    }
}

struct Record<'a> {
    time: DateTime<Local>,
    level: Level,
    service: &'a str,
    target: &'a str,
    file: Option<&'a str>,
    line: Option<u32>,
}

impl Record<'_> {
    fn write(&self, field: Field, out: &mut String) -> fmt::Result {
        match field {
            Field::Year => write!(out, "{:04}", self.time.year()),
            Field::Month => write!(out, "{:02}", self.time.month()),
            Field::Day => write!(out, "{:02}", self.time.day()),
            Field::Hour => write!(out, "{:02}", self.time.hour()),
            Field::Minute => write!(out, "{:02}", self.time.minute()),
            Field::Second => write!(out, "{:02}", self.time.second()),
            Field::Millis => write!(out, "{:03}", self.time.timestamp_subsec_millis() % 1000),
            Field::Micros => write!(out, "{:06}", self.time.timestamp_subsec_micros() % 1_000_000),
            Field::Nanos => {
                write!(out, "{:09}", self.time.timestamp_subsec_nanos() % 1_000_000_000)
            }
            Field::Level => out.write_str(level_name(self.level)),
            Field::LevelShort => out.write_str(&level_name(self.level)[..1].to_ascii_uppercase()),
            Field::Service => out.write_str(self.service),
            Field::Thread => out.write_str(&thread_id()),
            Field::Process => write!(out, "{}", std::process::id()),
            Field::Source => match (self.file, self.line) {
                (Some(file), Some(line)) => write!(out, "{}:{line}", file_name(file)),
                (Some(file), None) => out.write_str(file_name(file)),
                _ => out.write_str(self.target),
            },
            Field::File => out.write_str(self.file.map_or("", file_name)),
            Field::Line => match self.line {
                Some(line) => write!(out, "{line}"),
                None => Ok(()),
            },
            // Written by the field formatter.
            Field::Message => Ok(()),
        }
    }
}

impl<S, N> FormatEvent<S, N> for PatternFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        let record = Record {
            time: Local::now(),
            level: *metadata.level(),
            service: &self.service,
            target: metadata.target(),
            file: metadata.file(),
            line: metadata.line(),
        };
        let ansi = writer.has_ansi_escapes();
        let mut value = String::new();

        for token in &self.pattern.tokens {
            match token {
                Token::Literal(text) => writer.write_str(text)?,
                Token::ColorStart if ansi => writer.write_str(level_color(record.level))?,
                Token::ColorEnd if ansi => writer.write_str(RESET)?,
                Token::ColorStart | Token::ColorEnd => {}
                Token::Field {
                    field: Field::Message,
                    ..
                } => ctx.field_format().format_fields(writer.by_ref(), event)?,
                Token::Field { field, pad } => {
                    value.clear();
                    record.write(*field, &mut value)?;
                    write_padded(&mut writer, &value, *pad)?;
                }
            }
        }
        writeln!(writer)
    }
}

fn write_padded(writer: &mut Writer<'_>, value: &str, pad: Option<Pad>) -> fmt::Result {
    let Some(Pad { width, align }) = pad else {
        return writer.write_str(value);
    };
    match align {
        Align::Left => write!(writer, "{value:<width$}"),
        Align::Right => write!(writer, "{value:>width$}"),
        Align::Center => write!(writer, "{value:^width$}"),
    }
}

fn level_name(level: Level) -> &'static str {
    match level {
        Level::TRACE => "trace",
        Level::DEBUG => "debug",
        Level::INFO => "info",
        Level::WARN => "warning",
        Level::ERROR => "error",
    }
}

fn level_color(level: Level) -> &'static str {
    match level {
        Level::TRACE => "\x1b[37m",
        Level::DEBUG => "\x1b[36m",
        Level::INFO => "\x1b[32m",
        Level::WARN => "\x1b[33m\x1b[1m",
        Level::ERROR => "\x1b[31m\x1b[1m",
    }
}

fn file_name(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(path)
}

fn thread_id() -> String {
    let thread = std::thread::current();
    if let Some(name) = thread.name() {
        return name.to_string();
    }
    // `ThreadId(7)` -> `7`
    let id = format!("{:?}", thread.id());
    id.trim_start_matches("ThreadId(")
        .trim_end_matches(')')
        .to_string()
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Capture {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn render(pattern: &str, ansi: bool, emit: impl FnOnce()) -> String {
        let capture = Capture::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(ansi)
            .with_max_level(Level::TRACE)
            .event_format(PatternFormatter::new(Pattern::parse(pattern).unwrap(), "gateway"))
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, emit);
        capture.contents()
    }

    #[test]
    fn test_default_pattern_parses() {
        let pattern = Pattern::parse(DEFAULT_PATTERN).unwrap();
        assert_eq!(pattern, Pattern::default());
        assert!(pattern.tokens.contains(&Token::ColorStart));
        assert!(pattern.tokens.contains(&Token::Field {
            field: Field::Level,
            pad: Some(Pad {
                width: 8,
                align: Align::Left,
            }),
        }));
    }

    #[test]
    fn test_unknown_specifier_is_rejected() {
        assert_eq!(
            Pattern::parse("[%Q] %v"),
            Err(FormatError::UnknownSpecifier {
                specifier: 'Q',
                position: 1,
            })
        );
    }

    #[test]
    fn test_dangling_and_missing_width() {
        assert_eq!(
            Pattern::parse("%v %"),
            Err(FormatError::Dangling { position: 3 })
        );
        assert_eq!(
            Pattern::parse("%-l"),
            Err(FormatError::MissingWidth { position: 0 })
        );
    }

    #[test]
    fn test_escaped_percent_is_literal() {
        let pattern = Pattern::parse("100%% %v").unwrap();
        assert_eq!(pattern.tokens[0], Token::Literal("100% ".to_string()));
    }

    #[test]
    fn test_render_level_service_and_message() {
        let output = render("[%-8l][%n] %v", false, || {
            tracing::warn!(beat = 3, "slow beat");
        });
        assert_eq!(output, "[warning ][gateway] slow beat beat=3\n");
    }

    #[test]
    fn test_render_padding() {
        let output = render("%L|%5l|%=7l|%v", false, || tracing::info!("x"));
        assert_eq!(output, "I| info| info  |x\n");
    }

    #[test]
    fn test_render_source_location() {
        let output = render("%s:%# %@", false, || tracing::error!("boom"));
        let line = output.trim_end();
        let (short, full) = line.split_once(' ').unwrap();
        assert!(short.starts_with("pattern.rs:"));
        assert_eq!(short, full);
    }

    #[test]
    fn test_colors_only_with_ansi() {
        let plain = render("%^%l%$", false, || tracing::info!("x"));
        assert_eq!(plain, "info\n");
        let colored = render("%^%l%$", true, || tracing::info!("x"));
        assert_eq!(colored, format!("\x1b[32minfo{RESET}\n"));
    }

    #[test]
    fn test_render_timestamp_shape() {
        let output = render("%Y.%m.%d %H:%M:%S.%e", false, || tracing::info!("x"));
        let stamp = output.trim_end();
        assert_eq!(stamp.len(), "2024.01.31 23:59:59.999".len());
        assert_eq!(&stamp[4..5], ".");
        assert_eq!(&stamp[19..20], ".");
    }
}
