//! Process filter expressions.
//!
//! A query is a list of terms. Whitespace joins terms with AND, `|` joins
//! groups with OR and a leading `!` negates a single term. Values may be
//! wrapped in double quotes to include spaces or `|`.
//!
//! ```text
//! name:firefox | name:chrome
//! user:root !status:sleeping cpu>5
//! cmd:"--config /etc" mem>512M
//! ```

use crate::process::{Process, ProcessStatus, UniqueId};
use crate::types::{Result, TaskscopeError};
use bytesize::ByteSize;

/// A compiled filter; an empty query matches every process.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    groups: Vec<Vec<Term>>,
}

#[derive(Debug, Clone, PartialEq)]
struct Term {
    negated: bool,
    predicate: Predicate,
}

#[derive(Debug, Clone, PartialEq)]
enum Predicate {
    Name(String),
    Path(String),
    CommandLine(String),
    Description(String),
    User(String),
    Text(String),
    Pid(u32),
    Id(UniqueId),
    Parent(UniqueId),
    Status(ProcessStatus),
    CpuAbove(f32),
    CpuBelow(f32),
    MemoryAbove(u64),
    MemoryBelow(u64),
}

impl Predicate {
    fn matches(&self, process: &Process) -> bool {
        match self {
            Predicate::Name(needle) => contains(&process.file_name, needle),
            Predicate::Path(needle) => contains(&process.file_path, needle),
            Predicate::CommandLine(needle) => contains(&process.command_line, needle),
            Predicate::Description(needle) => contains(&process.description, needle),
            Predicate::User(needle) => contains(&process.user_name, needle),
            Predicate::Text(needle) => {
                contains(&process.file_name, needle)
                    || contains(&process.file_path, needle)
                    || contains(&process.command_line, needle)
                    || contains(&process.description, needle)
            }
            Predicate::Pid(pid) => process.pid == *pid,
            Predicate::Id(id) => process.unique_id == *id,
            Predicate::Parent(id) => process.parent_unique_id == Some(*id),
            Predicate::Status(status) => process.status == *status,
            Predicate::CpuAbove(percent) => cpu_percent(process) > *percent,
            Predicate::CpuBelow(percent) => cpu_percent(process) < *percent,
            Predicate::MemoryAbove(bytes) => *process.private_working_set.newest() > *bytes,
            Predicate::MemoryBelow(bytes) => *process.private_working_set.newest() < *bytes,
        }
    }
}

/// `needle` is stored lowercased at compile time.
fn contains(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(needle)
}

fn cpu_percent(process: &Process) -> f32 {
    process.cpu_usage.newest() * 100.0
}

impl Filter {
    pub fn compile(query: &str) -> Result<Self> {
        let mut groups = Vec::new();
        let mut current = Vec::new();
        let mut last_pipe = None;

        for token in tokenize(query)? {
            match token {
                Token::Pipe(position) => {
                    if current.is_empty() {
                        return Err(filter_error(position, "'|' without a term before it"));
                    }
                    groups.push(std::mem::take(&mut current));
                    last_pipe = Some(position);
                }
                Token::Word(word) => current.push(parse_term(&word)?),
            }
        }

        if current.is_empty() {
            if let Some(position) = last_pipe {
                return Err(filter_error(position, "'|' without a term after it"));
            }
        } else {
            groups.push(current);
        }
        Ok(Self { groups })
    }

    pub fn matches(&self, process: &Process) -> bool {
        self.groups.is_empty()
            || self.groups.iter().any(|group| {
                group
                    .iter()
                    .all(|term| term.predicate.matches(process) != term.negated)
            })
    }
}

impl std::str::FromStr for Filter {
    type Err = TaskscopeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::compile(s)
    }
}

fn filter_error(position: usize, message: impl Into<String>) -> TaskscopeError {
    TaskscopeError::Filter {
        position,
        message: message.into(),
    }
}

#[derive(Debug)]
enum Token {
    Word(Word),
    Pipe(usize),
}

#[derive(Debug, Default)]
struct Word {
    /// Byte offset of the term in the query, after any `!`.
    start: usize,
    negated: bool,
    text: String,
    /// Offset into `text` where the first quoted section begins.
    quoted_from: Option<usize>,
}

fn tokenize(query: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut word: Option<Word> = None;
    let mut chars = query.char_indices();

    while let Some((position, c)) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if let Some(done) = word.take() {
                    tokens.push(Token::Word(done));
                }
            }
            '|' => {
                if let Some(done) = word.take() {
                    tokens.push(Token::Word(done));
                }
                tokens.push(Token::Pipe(position));
            }
            '!' if word.is_none() => {
                word = Some(Word {
                    start: position + 1,
                    negated: true,
                    ..Default::default()
                });
            }
            '"' => {
                let current = word.get_or_insert_with(|| Word {
                    start: position,
                    ..Default::default()
                });
                current.quoted_from.get_or_insert(current.text.len());
                let mut closed = false;
                for (_, quoted) in chars.by_ref() {
                    if quoted == '"' {
                        closed = true;
                        break;
                    }
                    current.text.push(quoted);
                }
                if !closed {
                    return Err(filter_error(position, "unterminated quote"));
                }
            }
            c => {
                word.get_or_insert_with(|| Word {
                    start: position,
                    ..Default::default()
                })
                .text
                .push(c);
            }
        }
    }

    if let Some(done) = word.take() {
        tokens.push(Token::Word(done));
    }
    Ok(tokens)
}

fn parse_term(word: &Word) -> Result<Term> {
    let unquoted = &word.text[..word.quoted_from.unwrap_or(word.text.len())];
    let operator = unquoted.find([':', '>', '<']);

    let predicate = match operator {
        None => {
            if word.text.is_empty() {
                return Err(filter_error(word.start, "empty term"));
            }
            Predicate::Text(word.text.to_lowercase())
        }
        Some(at) => {
            let tag = &word.text[..at];
            let op = &word.text[at..at + 1];
            let value = &word.text[at + 1..];
            let value_position = word.start + at + 1;
            if value.is_empty() {
                return Err(filter_error(value_position, format!("empty value for '{tag}'")));
            }
            parse_predicate(tag, op, value, word.start, value_position)?
        }
    };

    Ok(Term {
        negated: word.negated,
        predicate,
    })
}

fn parse_predicate(
    tag: &str,
    op: &str,
    value: &str,
    tag_position: usize,
    value_position: usize,
) -> Result<Predicate> {
    let predicate = match (tag.to_ascii_lowercase().as_str(), op) {
        ("name", ":") => Predicate::Name(value.to_lowercase()),
        ("path", ":") => Predicate::Path(value.to_lowercase()),
        ("cmd", ":") => Predicate::CommandLine(value.to_lowercase()),
        ("desc", ":") => Predicate::Description(value.to_lowercase()),
        ("user", ":") => Predicate::User(value.to_lowercase()),
        ("pid", ":") => Predicate::Pid(parse_number(value, value_position)?),
        ("id", ":") => Predicate::Id(UniqueId::new(parse_number(
            value.trim_start_matches('#'),
            value_position,
        )?)),
        ("parent", ":") => Predicate::Parent(UniqueId::new(parse_number(
            value.trim_start_matches('#'),
            value_position,
        )?)),
        ("status", ":") => Predicate::Status(
            value
                .parse()
                .map_err(|e: String| filter_error(value_position, e))?,
        ),
        ("cpu", ">") => Predicate::CpuAbove(parse_percent(value, value_position)?),
        ("cpu", "<") => Predicate::CpuBelow(parse_percent(value, value_position)?),
        ("mem", ">") => Predicate::MemoryAbove(parse_size(value, value_position)?),
        ("mem", "<") => Predicate::MemoryBelow(parse_size(value, value_position)?),
        _ => {
            return Err(filter_error(
                tag_position,
                format!("unknown filter '{tag}{op}'"),
            ))
        }
    };
    Ok(predicate)
}

fn parse_number<T: std::str::FromStr>(value: &str, position: usize) -> Result<T> {
    value
        .parse()
        .map_err(|_| filter_error(position, format!("'{value}' is not a valid number")))
}

fn parse_percent(value: &str, position: usize) -> Result<f32> {
    let percent: f32 = parse_number(value.trim_end_matches('%'), position)?;
    if !percent.is_finite() {
        return Err(filter_error(position, format!("'{value}' is not a valid number")));
    }
    Ok(percent)
}

fn parse_size(value: &str, position: usize) -> Result<u64> {
    value
        .parse::<ByteSize>()
        .map(|size| size.as_u64())
        .map_err(|_| filter_error(position, format!("'{value}' is not a valid size, use e.g. 512M or 1GiB")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn process(id: u64, pid: u32, name: &str) -> Process {
        let mut process = Process::new(UniqueId::new(id), pid, 4);
        process.file_name = name.to_string();
        process.file_path = format!("/usr/bin/{name}");
        process.command_line = format!("/usr/bin/{name} --verbose");
        process.user_name = "alice".to_string();
        process
    }

    fn sample() -> Vec<Process> {
        let mut firefox = process(1, 100, "firefox");
        firefox.cpu_usage.add_value(0.25);
        firefox.private_working_set.add_value(800 * 1024 * 1024);

        let mut bash = process(2, 200, "bash");
        bash.user_name = "root".to_string();
        bash.status = ProcessStatus::Sleeping;
        bash.parent_unique_id = Some(UniqueId::new(1));
        bash.cpu_usage.add_value(0.01);
        bash.private_working_set.add_value(4 * 1024 * 1024);

        let mut chrome = process(3, 300, "Chrome");
        chrome.description = "Web Browser".to_string();
        chrome.command_line = "chrome --profile \"Work Profile\"".to_string();
        chrome.cpu_usage.add_value(0.10);
        chrome.private_working_set.add_value(300 * 1024 * 1024);

        vec![firefox, bash, chrome]
    }

    fn matching(query: &str) -> Vec<u32> {
        let processes = sample();
        let filter = Filter::compile(query).unwrap();
        processes
            .iter()
            .filter(|p| filter.matches(p))
            .map(|p| p.pid)
            .collect()
    }

    fn error_position(query: &str) -> usize {
        match Filter::compile(query) {
            Err(TaskscopeError::Filter { position, .. }) => position,
            other => panic!("expected filter error for {query:?}, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_query_matches_everything() {
        assert_eq!(Filter::compile("").unwrap(), Filter::default());
        assert_eq!(matching("   "), vec![100, 200, 300]);
    }

    #[test]
    fn test_name_is_case_insensitive() {
        assert_eq!(matching("name:chrome"), vec![300]);
        assert_eq!(matching("name:FIRE"), vec![100]);
    }

    #[test]
    fn test_bare_text_searches_several_fields() {
        assert_eq!(matching("browser"), vec![300]);
        assert_eq!(matching("verbose"), vec![100, 200]);
    }

    #[test]
    fn test_and_or_and_negation() {
        assert_eq!(matching("user:alice name:fire"), vec![100]);
        assert_eq!(matching("name:bash | name:chrome"), vec![200, 300]);
        assert_eq!(matching("name:bash|name:chrome"), vec![200, 300]);
        assert_eq!(matching("!user:root"), vec![100, 300]);
        assert_eq!(matching("!status:running"), vec![200]);
    }

    #[test]
    fn test_quoted_values() {
        assert_eq!(matching("cmd:\"work profile\""), vec![300]);
        assert_eq!(matching("desc:\"web browser\" | pid:100"), vec![100, 300]);
    }

    #[test]
    fn test_identity_tags() {
        assert_eq!(matching("pid:200"), vec![200]);
        assert_eq!(matching("id:3"), vec![300]);
        assert_eq!(matching("id:#1"), vec![100]);
        assert_eq!(matching("parent:1"), vec![200]);
        assert_eq!(matching("status:sleeping"), vec![200]);
    }

    #[test]
    fn test_cpu_and_memory_thresholds() {
        assert_eq!(matching("cpu>5"), vec![100, 300]);
        assert_eq!(matching("cpu<5%"), vec![200]);
        assert_eq!(matching("mem>100MiB"), vec![100, 300]);
        assert_eq!(matching("mem<1GiB !mem<100MiB"), vec![100, 300]);
        assert_eq!(matching("mem<5000000"), vec![200]);
    }

    #[test]
    fn test_compile_errors_report_position() {
        assert_eq!(error_position("name:x color:red"), 7);
        assert_eq!(error_position("name:"), 5);
        assert_eq!(error_position("cmd:\"open"), 4);
        assert_eq!(error_position("pid:abc"), 4);
        assert_eq!(error_position("status:flying"), 7);
        assert_eq!(error_position("name:a |"), 7);
        assert_eq!(error_position("| name:a"), 0);
        assert_eq!(error_position("name:a | | name:b"), 9);
        assert_eq!(error_position("mem>lots"), 4);
    }

    #[test]
    fn test_from_str() {
        let filter: Filter = "name:bash".parse().unwrap();
        assert!(filter.matches(&sample()[1]));
        assert!(!filter.matches(&sample()[0]));
    }
}
