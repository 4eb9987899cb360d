//! Minimal lexer that separates code, string literals and comments.
//!
//! This is not a tokenizer. It only knows enough about each language to
//! tell a comment from a string so that normalization never eats text that
//! lives inside a literal.

use crate::language::{CommentStyle, Language};

/// A run of source text of a single kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Code(String),
    Str(String),
    Comment { text: String, doc: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Code,
    LineComment { doc: bool },
    BlockComment { doc: bool, lua: bool },
    Str { delim: char, triple: bool, raw: bool },
}

/// Split `content` into code, string and comment segments.
pub fn segments(content: &str, language: Language) -> Vec<Segment> {
    let style = language.comment_style();
    let chars: Vec<char> = content.chars().collect();
    let mut out = Vec::new();
    let mut buf = String::new();
    let mut state = State::Code;
    let mut i = 0;

    let flush = |out: &mut Vec<Segment>, buf: &mut String, state: State| {
        if buf.is_empty() {
            return;
        }
        let text = std::mem::take(buf);
        out.push(match state {
            State::Code => Segment::Code(text),
            State::Str { .. } => Segment::Str(text),
            State::LineComment { doc } | State::BlockComment { doc, .. } => {
                Segment::Comment { text, doc }
            }
        });
    };

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        let next2 = chars.get(i + 2).copied();

        match state {
            State::Code => {
                if let Some((new_state, consumed)) =
                    comment_start(style, c, next, next2, chars.get(i + 3).copied())
                {
                    flush(&mut out, &mut buf, state);
                    state = new_state;
                    buf.extend(&chars[i..i + consumed]);
                    i += consumed;
                    continue;
                }
                if is_string_delim(language, c) {
                    flush(&mut out, &mut buf, state);
                    let triple = language == Language::Python
                        && next == Some(c)
                        && next2 == Some(c);
                    let raw = c == '`' && language == Language::Go;
                    state = State::Str {
                        delim: c,
                        triple,
                        raw,
                    };
                    if triple {
                        buf.extend([c, c, c]);
                        i += 3;
                    } else {
                        buf.push(c);
                        i += 1;
                    }
                    continue;
                }
                buf.push(c);
                i += 1;
            }
            State::LineComment { .. } => {
                if c == '\n' {
                    flush(&mut out, &mut buf, state);
                    state = State::Code;
                    buf.push(c);
                } else {
                    buf.push(c);
                }
                i += 1;
            }
            State::BlockComment { lua, .. } => {
                let closes = if lua {
                    c == ']' && next == Some(']')
                } else {
                    c == '*' && next == Some('/')
                };
                if closes {
                    buf.push(c);
                    buf.push(chars[i + 1]);
                    i += 2;
                    flush(&mut out, &mut buf, state);
                    state = State::Code;
                } else {
                    buf.push(c);
                    i += 1;
                }
            }
            State::Str { delim, triple, raw } => {
                if c == '\\' && !raw {
                    buf.push(c);
                    if let Some(n) = next {
                        buf.push(n);
                    }
                    i += 2;
                    continue;
                }
                if c == delim {
                    if triple {
                        if next == Some(delim) && next2 == Some(delim) {
                            buf.extend([c, c, c]);
                            i += 3;
                            flush(&mut out, &mut buf, state);
                            state = State::Code;
                            continue;
                        }
                    } else {
                        buf.push(c);
                        i += 1;
                        flush(&mut out, &mut buf, state);
                        state = State::Code;
                        continue;
                    }
                }
                // Unterminated single-line strings end at the newline so a
                // stray quote cannot swallow the rest of the file.
                if c == '\n' && !triple && delim != '`' {
                    flush(&mut out, &mut buf, state);
                    state = State::Code;
                    buf.push(c);
                    i += 1;
                    continue;
                }
                buf.push(c);
                i += 1;
            }
        }
    }

    flush(&mut out, &mut buf, state);
    out
}

fn is_string_delim(language: Language, c: char) -> bool {
    match c {
        '"' => true,
        '\'' => language.single_quote_strings(),
        '`' => language.has_backtick_strings(),
        _ => false,
    }
}

/// Returns the comment state and how many chars the opener spans.
fn comment_start(
    style: CommentStyle,
    c: char,
    next: Option<char>,
    next2: Option<char>,
    next3: Option<char>,
) -> Option<(State, usize)> {
    let c_like = || -> Option<(State, usize)> {
        if c != '/' {
            return None;
        }
        match next {
            Some('/') => {
                let doc = matches!(next2, Some('/') | Some('!')) && next3 != Some('/');
                Some((State::LineComment { doc }, 2))
            }
            Some('*') => {
                let doc = (next2 == Some('*') && next3 != Some('/')) || next2 == Some('!');
                Some((State::BlockComment { doc, lua: false }, 2))
            }
            _ => None,
        }
    };

    match style {
        CommentStyle::CLike => c_like(),
        CommentStyle::Hash => {
            if c == '#' {
                Some((State::LineComment { doc: false }, 1))
            } else {
                None
            }
        }
        CommentStyle::CLikeAndHash => {
            if c == '#' && next != Some('[') {
                Some((State::LineComment { doc: false }, 1))
            } else {
                c_like()
            }
        }
        CommentStyle::DoubleDash => {
            if c == '-' && next == Some('-') {
                if next2 == Some('[') && next3 == Some('[') {
                    Some((State::BlockComment { doc: false, lua: true }, 4))
                } else {
                    let doc = next2 == Some('-');
                    Some((State::LineComment { doc }, 2))
                }
            } else {
                None
            }
        }
    }
}

/// Remove comments from `content`, keeping doc comments when asked.
///
/// Newlines inside removed block comments are preserved so line structure
/// survives.
pub fn strip_comments(content: &str, language: Language, keep_doc: bool) -> String {
    let mut out = String::with_capacity(content.len());
    for segment in segments(content, language) {
        match segment {
            Segment::Code(text) | Segment::Str(text) => out.push_str(&text),
            Segment::Comment { text, doc } => {
                if keep_doc && doc {
                    out.push_str(&text);
                } else {
                    out.extend(text.chars().filter(|c| *c == '\n'));
                }
            }
        }
    }
    out
}
