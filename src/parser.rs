use std::os::unix::io::RawFd;

use thiserror::Error;

pub const MAXARGS: usize = 128;

/// One pipeline stage, as produced by the parser. The executor borrows this
/// read-only; it is never mutated or freed by the pipeline machinery.
#[derive(Debug, Default, Clone)]
pub struct Command {
    /// Command and its arguments; argv[0] is the program name.
    pub argv: Vec<String>,
    /// Input redirection file, if any.
    pub input_file: Option<String>,
    /// Target fd for the input redirection (0 unless `N<` was given).
    pub input_fd: Option<RawFd>,
    /// Output redirection file (truncate). Mutually exclusive with `append_file`.
    pub output_file: Option<String>,
    /// Output redirection file (append). Mutually exclusive with `output_file`.
    pub append_file: Option<String>,
    /// Target fd for the output redirection (1 unless `N>` was given).
    pub output_fd: Option<RawFd>,
    /// Stderr redirection file, if any.
    pub error_file: Option<String>,
    /// `1>&2`: stdout duplicated onto stderr's destination.
    pub stdout_to_stderr: bool,
    /// `2>&1`: stderr duplicated onto stdout's destination.
    pub stderr_to_stdout: bool,
    /// Inline heredoc body. Filled in by the input loop after parsing.
    pub heredoc: Option<String>,
    /// Working-directory override applied in the child before exec.
    pub cwd_override: Option<String>,
    /// Run without waiting; the job is registered instead.
    pub background: bool,
}

impl Command {
    pub fn new() -> Self {
        Command::default()
    }
}

/// A heredoc redirection whose body has not been read yet: the index of the
/// command it belongs to, and the delimiter line that ends the body.
#[derive(Debug, PartialEq, Eq)]
pub struct PendingHeredoc {
    pub command: usize,
    pub delimiter: String,
}

#[derive(Debug)]
pub struct ParsedLine {
    pub commands: Vec<Command>,
    pub heredocs: Vec<PendingHeredoc>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("syntax error near `{0}`")]
    MissingTarget(String),
    #[error("unsupported fd duplication {0}>&{1}")]
    UnsupportedDup(RawFd, RawFd),
    #[error("too many arguments")]
    TooManyArguments,
}

#[derive(Debug, PartialEq, Eq)]
enum Token {
    Word(String),
    Pipe,
    Background,
    RedirIn { fd: Option<RawFd> },
    RedirOut { fd: Option<RawFd>, append: bool },
    RedirDup { target: RawFd, source: RawFd },
    Heredoc,
}

/// Parses one (already variable-expanded) command line into the stages of a
/// pipeline. Handles quoting, `<` `>` `>>` with optional fd prefixes, `2>`,
/// `2>&1` / `1>&2`, `<<`, `|`, and a trailing `&`.
pub fn parse_command_line(line: &str) -> Result<ParsedLine, ParseError> {
    let tokens = tokenize(line);

    let mut commands = vec![Command::new()];
    let mut heredocs = Vec::new();
    let mut background = false;
    let mut iter = tokens.into_iter().peekable();

    while let Some(token) = iter.next() {
        if token == Token::Pipe {
            commands.push(Command::new());
            continue;
        }
        if token == Token::Background {
            background = true;
            continue;
        }
        let index = commands.len() - 1;
        let current = &mut commands[index];
        match token {
            Token::Word(word) => {
                if current.argv.len() >= MAXARGS - 1 {
                    return Err(ParseError::TooManyArguments);
                }
                current.argv.push(word);
            }
            Token::Pipe | Token::Background => unreachable!(),
            Token::RedirIn { fd } => {
                let target = next_word(&mut iter, "<")?;
                current.input_file = Some(target);
                current.input_fd = fd;
            }
            Token::RedirOut { fd, append } => {
                let target = next_word(&mut iter, if append { ">>" } else { ">" })?;
                if fd == Some(2) {
                    current.error_file = Some(target);
                } else if append {
                    current.append_file = Some(target);
                    current.output_file = None;
                    current.output_fd = fd;
                } else {
                    current.output_file = Some(target);
                    current.append_file = None;
                    current.output_fd = fd;
                }
            }
            Token::RedirDup { target, source } => match (target, source) {
                (2, 1) => current.stderr_to_stdout = true,
                (1, 2) => current.stdout_to_stderr = true,
                (t, s) => return Err(ParseError::UnsupportedDup(t, s)),
            },
            Token::Heredoc => {
                let delimiter = next_word(&mut iter, "<<")?;
                current.heredoc = Some(String::new());
                heredocs.push(PendingHeredoc {
                    command: index,
                    delimiter,
                });
            }
        }
    }

    // Drop a trailing all-empty pipeline, e.g. a blank line.
    if commands.len() == 1 && commands[0].argv.is_empty() && !has_redirections(&commands[0]) {
        commands.clear();
    }
    if background {
        if let Some(last) = commands.last_mut() {
            last.background = true;
        }
    }

    Ok(ParsedLine { commands, heredocs })
}

fn has_redirections(cmd: &Command) -> bool {
    cmd.input_file.is_some()
        || cmd.output_file.is_some()
        || cmd.append_file.is_some()
        || cmd.error_file.is_some()
        || cmd.heredoc.is_some()
        || cmd.stdout_to_stderr
        || cmd.stderr_to_stdout
}

fn next_word<I>(iter: &mut std::iter::Peekable<I>, op: &str) -> Result<String, ParseError>
where
    I: Iterator<Item = Token>,
{
    match iter.next() {
        Some(Token::Word(w)) => Ok(w),
        _ => Err(ParseError::MissingTarget(op.to_string())),
    }
}

/// Splits the line into words and operators. Single and double quotes group
/// characters into one word and make operator characters literal; a run of
/// digits immediately before `<` or `>` is consumed as an fd prefix.
fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    let mut word = String::new();
    let mut word_open = false; // a quoted empty string is still a word

    macro_rules! flush_word {
        () => {
            if word_open || !word.is_empty() {
                tokens.push(Token::Word(std::mem::take(&mut word)));
                word_open = false;
            }
        };
    }

    while let Some(&c) = chars.peek() {
        match c {
            _ if c.is_whitespace() => {
                chars.next();
                flush_word!();
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                word_open = true;
                while let Some(&q) = chars.peek() {
                    chars.next();
                    if q == quote {
                        break;
                    }
                    word.push(q);
                }
            }
            '\\' => {
                chars.next();
                if let Some(&escaped) = chars.peek() {
                    chars.next();
                    word.push(escaped);
                }
            }
            '|' => {
                chars.next();
                flush_word!();
                tokens.push(Token::Pipe);
            }
            '&' => {
                chars.next();
                flush_word!();
                tokens.push(Token::Background);
            }
            '<' | '>' => {
                // An unquoted all-digit word directly before the chevron is
                // an fd prefix, not an argument.
                let mut fd = None;
                if !word_open && !word.is_empty() && word.chars().all(|d| d.is_ascii_digit()) {
                    if let Ok(n) = word.parse::<RawFd>() {
                        word.clear();
                        fd = Some(n);
                    }
                }
                flush_word!();
                chars.next();
                if c == '<' {
                    if chars.peek() == Some(&'<') {
                        chars.next();
                        tokens.push(Token::Heredoc);
                    } else {
                        tokens.push(Token::RedirIn { fd });
                    }
                } else {
                    let append = chars.peek() == Some(&'>');
                    if append {
                        chars.next();
                    }
                    if !append && chars.peek() == Some(&'&') {
                        chars.next();
                        let mut digits = String::new();
                        while let Some(&d) = chars.peek() {
                            if d.is_ascii_digit() {
                                digits.push(d);
                                chars.next();
                            } else {
                                break;
                            }
                        }
                        if let Ok(source) = digits.parse::<RawFd>() {
                            tokens.push(Token::RedirDup {
                                target: fd.unwrap_or(1),
                                source,
                            });
                            continue;
                        }
                    }
                    tokens.push(Token::RedirOut { fd, append });
                }
            }
            _ => {
                word.push(c);
                chars.next();
            }
        }
    }
    flush_word!();
    tokens
}
