use std::fmt;

use crate::jobs::{Job, Process};
use crate::redirect::{RedirectTarget, Redirection};

/// A diagnosable parse failure. No partial job escapes the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Unexpected token at the reported position.
    Syntax(String),
    /// A dup-style redirect whose target is not a descriptor number.
    AmbiguousRedirect(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Syntax(token) => {
                write!(f, "syntax error near unexpected token `{token}'")
            }
            ParseError::AmbiguousRedirect(token) => write!(f, "{token}: ambiguous redirect"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Parse one command line into a job.
///
/// The line arrives with the trailing newline and any `#` comment already
/// stripped. Grammar:
///
/// ```text
/// job      := pipeline ('&')?
/// pipeline := process ('|' process)*
/// process  := (word | redir)+
/// redir    := [digits] ('<' | '>' | '>>' | '>&' | '<&') (word | digits)
/// ```
///
/// Only the last process of a pipeline may carry the background suffix;
/// the job's background flag mirrors it.
pub fn parse_job(line: &str) -> Result<Job, ParseError> {
    let text = line.trim();
    let segments: Vec<&str> = text.split('|').collect();
    let last = segments.len() - 1;

    let mut procs = Vec::with_capacity(segments.len());
    let mut background = false;

    for (i, segment) in segments.iter().enumerate() {
        let parsed = parse_process(segment)?;
        if parsed.argv.is_empty() {
            let token = if segments.len() > 1 { "|" } else { "newline" };
            return Err(ParseError::Syntax(token.into()));
        }
        if parsed.background && i != last {
            return Err(ParseError::Syntax("|".into()));
        }
        if parsed.background {
            background = true;
        }
        procs.push(Process::new(parsed.argv, parsed.redirections));
    }

    let mut cmd = text.to_string();
    if background {
        cmd = cmd.trim_end_matches('&').trim_end().to_string();
    }

    Ok(Job::new(cmd, procs, background))
}

struct ParsedProcess {
    argv: Vec<String>,
    redirections: Vec<Redirection>,
    background: bool,
}

/// A redirection operator seen but still waiting for its target token.
#[derive(Clone, Copy)]
struct PendingRedirect {
    kind: PendingKind,
    fd: i32,
}

#[derive(Clone, Copy)]
enum PendingKind {
    WriteTrunc,
    WriteAppend,
    DupOut,
    ReadFile,
    DupIn,
}

/// Parse one pipeline segment: words, redirections, background suffix.
fn parse_process(segment: &str) -> Result<ParsedProcess, ParseError> {
    let bytes = segment.as_bytes();
    let mut argv: Vec<String> = Vec::new();
    let mut redirections = Vec::new();
    let mut background = false;
    let mut pending: Option<PendingRedirect> = None;
    let mut word_start: Option<usize> = None;
    let mut i = 0;

    // The loop runs one step past the end: the virtual newline closes the
    // final word or reports a redirection that never got a target.
    while i <= bytes.len() {
        let c = bytes.get(i).copied();

        if let Some(b) = c {
            if is_word_byte(b) {
                if word_start.is_none() {
                    word_start = Some(i);
                }
                i += 1;
                continue;
            }
        }

        // The byte at `i` (or the virtual newline) ends the current word.
        let word = word_start.take().map(|start| &segment[start..i]);

        // A digit run glued to `<` or `>` names the descriptor to rewire
        // instead of becoming an argument.
        let mut fd_prefix: Option<i32> = None;

        if let Some(word) = word {
            if let Some(p) = pending.take() {
                redirections.push(complete_redirect(p, word)?);
            } else if background {
                return Err(ParseError::Syntax(word.to_string()));
            } else if matches!(c, Some(b'<') | Some(b'>')) && parse_fd(word).is_some() {
                fd_prefix = parse_fd(word);
            } else {
                argv.push(word.to_string());
            }
        }

        match c {
            None => {
                if pending.is_some() {
                    return Err(ParseError::Syntax("newline".into()));
                }
            }
            Some(b'>') => {
                if pending.is_some() || background {
                    return Err(ParseError::Syntax(">".into()));
                }
                let kind = match bytes.get(i + 1) {
                    Some(b'>') => {
                        i += 1;
                        PendingKind::WriteAppend
                    }
                    Some(b'&') => {
                        i += 1;
                        PendingKind::DupOut
                    }
                    _ => PendingKind::WriteTrunc,
                };
                pending = Some(PendingRedirect {
                    kind,
                    fd: fd_prefix.unwrap_or(1),
                });
            }
            Some(b'<') => {
                if pending.is_some() || background {
                    return Err(ParseError::Syntax("<".into()));
                }
                let kind = match bytes.get(i + 1) {
                    Some(b'&') => {
                        i += 1;
                        PendingKind::DupIn
                    }
                    _ => PendingKind::ReadFile,
                };
                pending = Some(PendingRedirect {
                    kind,
                    fd: fd_prefix.unwrap_or(0),
                });
            }
            Some(b'&') => {
                if pending.is_some() {
                    return Err(ParseError::Syntax("&".into()));
                }
                background = true;
            }
            Some(_) => {} // blank between tokens
        }

        i += 1;
    }

    Ok(ParsedProcess {
        argv,
        redirections,
        background,
    })
}

fn complete_redirect(p: PendingRedirect, token: &str) -> Result<Redirection, ParseError> {
    let target = match p.kind {
        PendingKind::WriteTrunc => RedirectTarget::WriteTrunc(token.to_string()),
        PendingKind::WriteAppend => RedirectTarget::WriteAppend(token.to_string()),
        PendingKind::ReadFile => RedirectTarget::ReadFile(token.to_string()),
        PendingKind::DupOut => match parse_fd(token) {
            Some(fd) => RedirectTarget::DupOut(fd),
            // `cmd >& file` is accepted as `cmd > file`; any other
            // non-numeric dup target is ambiguous.
            None if p.fd == 1 => RedirectTarget::WriteTrunc(token.to_string()),
            None => return Err(ParseError::AmbiguousRedirect(token.to_string())),
        },
        PendingKind::DupIn => match parse_fd(token) {
            Some(fd) => RedirectTarget::DupIn(fd),
            None => return Err(ParseError::AmbiguousRedirect(token.to_string())),
        },
    };

    Ok(Redirection { fd: p.fd, target })
}

fn is_word_byte(b: u8) -> bool {
    !b.is_ascii_whitespace() && !matches!(b, b'<' | b'>' | b'&' | b'|')
}

fn parse_fd(token: &str) -> Option<i32> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redirs(line: &str) -> Vec<Redirection> {
        let job = parse_job(line).unwrap();
        job.procs[0].redirections.clone()
    }

    #[test]
    fn simple_command() {
        let job = parse_job("echo hello").unwrap();
        assert_eq!(job.procs.len(), 1);
        assert_eq!(job.procs[0].argv, vec!["echo", "hello"]);
        assert!(!job.background);
        assert_eq!(job.cmd, "echo hello");
    }

    #[test]
    fn pipeline_splits_into_processes() {
        let job = parse_job("cat file.txt | wc -l").unwrap();
        assert_eq!(job.procs.len(), 2);
        assert_eq!(job.procs[0].argv, vec!["cat", "file.txt"]);
        assert_eq!(job.procs[1].argv, vec!["wc", "-l"]);
    }

    #[test]
    fn trailing_ampersand_sets_background() {
        let job = parse_job("sleep 10 &").unwrap();
        assert!(job.background);
        assert_eq!(job.procs[0].argv, vec!["sleep", "10"]);
        // The display form drops the suffix.
        assert_eq!(job.cmd, "sleep 10");
    }

    #[test]
    fn ampersand_glued_to_word_sets_background() {
        let job = parse_job("sleep 10&").unwrap();
        assert!(job.background);
        assert_eq!(job.procs[0].argv, vec!["sleep", "10"]);
    }

    #[test]
    fn background_on_non_last_process_is_error() {
        assert_eq!(
            parse_job("sleep 10 & | wc").unwrap_err(),
            ParseError::Syntax("|".into())
        );
    }

    #[test]
    fn word_after_ampersand_is_error() {
        assert_eq!(
            parse_job("sleep 10 & now").unwrap_err(),
            ParseError::Syntax("now".into())
        );
    }

    #[test]
    fn empty_pipeline_segment_is_error() {
        assert_eq!(parse_job("cat |").unwrap_err(), ParseError::Syntax("|".into()));
        assert_eq!(parse_job("| cat").unwrap_err(), ParseError::Syntax("|".into()));
    }

    #[test]
    fn output_redirect_defaults_to_stdout() {
        let redirs = redirs("echo hi > out.txt");
        assert_eq!(
            redirs,
            vec![Redirection {
                fd: 1,
                target: RedirectTarget::WriteTrunc("out.txt".into()),
            }]
        );
    }

    #[test]
    fn input_redirect_defaults_to_stdin() {
        let redirs = redirs("sort < data.txt");
        assert_eq!(
            redirs,
            vec![Redirection {
                fd: 0,
                target: RedirectTarget::ReadFile("data.txt".into()),
            }]
        );
    }

    #[test]
    fn fd_prefix_binds_only_when_adjacent() {
        let job = parse_job("prog 2> err.txt").unwrap();
        assert_eq!(job.procs[0].argv, vec!["prog"]);
        assert_eq!(job.procs[0].redirections[0].fd, 2);

        // With a blank in between the digits are an ordinary argument.
        let job = parse_job("prog 2 > err.txt").unwrap();
        assert_eq!(job.procs[0].argv, vec!["prog", "2"]);
        assert_eq!(job.procs[0].redirections[0].fd, 1);
    }

    #[test]
    fn word_ending_in_digits_is_not_an_fd_prefix() {
        let job = parse_job("echo abc2> out").unwrap();
        assert_eq!(job.procs[0].argv, vec!["echo", "abc2"]);
        assert_eq!(job.procs[0].redirections[0].fd, 1);
    }

    #[test]
    fn append_operator() {
        let redirs = redirs("echo hi 2>> log");
        assert_eq!(
            redirs,
            vec![Redirection {
                fd: 2,
                target: RedirectTarget::WriteAppend("log".into()),
            }]
        );
    }

    #[test]
    fn dup_operators_take_descriptor_targets() {
        assert_eq!(
            redirs("prog 2>&1"),
            vec![Redirection {
                fd: 2,
                target: RedirectTarget::DupOut(1),
            }]
        );
        assert_eq!(
            redirs("prog 3<&0"),
            vec![Redirection {
                fd: 3,
                target: RedirectTarget::DupIn(0),
            }]
        );
    }

    #[test]
    fn dup_out_to_path_is_lenient_for_stdout() {
        // `cmd >& file` is the conventional spelling of `cmd > file`.
        assert_eq!(
            redirs("prog >& capture"),
            vec![Redirection {
                fd: 1,
                target: RedirectTarget::WriteTrunc("capture".into()),
            }]
        );
    }

    #[test]
    fn dup_out_to_path_with_explicit_fd_is_ambiguous() {
        assert_eq!(
            parse_job("prog 2>& capture").unwrap_err(),
            ParseError::AmbiguousRedirect("capture".into())
        );
    }

    #[test]
    fn dup_in_to_path_is_ambiguous() {
        assert_eq!(
            parse_job("prog <& capture").unwrap_err(),
            ParseError::AmbiguousRedirect("capture".into())
        );
    }

    #[test]
    fn redirections_keep_declared_order() {
        let redirs1 = redirs("prog > a > b");
        assert_eq!(
            redirs1,
            vec![
                Redirection {
                    fd: 1,
                    target: RedirectTarget::WriteTrunc("a".into()),
                },
                Redirection {
                    fd: 1,
                    target: RedirectTarget::WriteTrunc("b".into()),
                },
            ]
        );

        let redirs2 = redirs("prog 2>&1 > file");
        assert_eq!(
            redirs2,
            vec![
                Redirection {
                    fd: 2,
                    target: RedirectTarget::DupOut(1),
                },
                Redirection {
                    fd: 1,
                    target: RedirectTarget::WriteTrunc("file".into()),
                },
            ]
        );
    }

    #[test]
    fn dangling_redirect_is_error() {
        assert_eq!(
            parse_job("echo hi >").unwrap_err(),
            ParseError::Syntax("newline".into())
        );
    }

    #[test]
    fn doubled_operator_is_error() {
        assert_eq!(
            parse_job("echo > > out").unwrap_err(),
            ParseError::Syntax(">".into())
        );
        assert_eq!(
            parse_job("echo > & out").unwrap_err(),
            ParseError::Syntax("&".into())
        );
    }

    #[test]
    fn display_form_reparses_to_equal_job() {
        let original = parse_job("cat in.txt 2>&1 | sort -r | head -n 3").unwrap();
        let reparsed = parse_job(&original.cmd).unwrap();

        assert_eq!(original.procs.len(), reparsed.procs.len());
        for (a, b) in original.procs.iter().zip(reparsed.procs.iter()) {
            assert_eq!(a.argv, b.argv);
            assert_eq!(a.redirections, b.redirections);
        }
        assert_eq!(original.background, reparsed.background);
    }
}
