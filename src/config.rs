//! Permissive textual configuration trees.
//!
//! The extractor and packager are driven by plain-text config files
//! (`extractor_config.txt`, `darkagesmod.txt`) and mod zips may carry the
//! same format as a manifest. The syntax is a nested block language:
//!
//! ```text
//! core {
//!     input_folder = "C:/game"
//!     run_extractor = true
//! }
//! aliasing {
//!     "loose name.txt" = "rs_streamfile/real/path.txt"
//! }
//! ```
//!
//! Parsing is permissive: unknown keys are ignored by callers, values and
//! child blocks are both optional, `//` starts a line comment, and bare or
//! quoted tokens are interchangeable.

use std::path::{Path, PathBuf};

use crate::error::{ModError, Result};

/// One node of a parsed config tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntNode {
    pub name: String,
    pub value: String,
    pub children: Vec<EntNode>,
}

impl EntNode {
    /// First child with the given name, or a shared empty sentinel.
    ///
    /// Missing keys resolve to the sentinel so lookups chain without
    /// intermediate `Option`s, mirroring how callers probe optional
    /// sections.
    pub fn child(&self, name: &str) -> &EntNode {
        static MISSING: EntNode = EntNode {
            name: String::new(),
            value: String::new(),
            children: Vec::new(),
        };
        self.children
            .iter()
            .find(|c| c.name == name)
            .unwrap_or(&MISSING)
    }

    pub fn exists(&self) -> bool {
        !self.name.is_empty() || !self.children.is_empty() || !self.value.is_empty()
    }

    /// The node's value, or `None` when the key was absent or empty.
    pub fn value_str(&self) -> Option<&str> {
        if self.value.is_empty() {
            None
        } else {
            Some(&self.value)
        }
    }

    /// Read a boolean value, warning and falling back when absent/invalid.
    pub fn value_bool_or(&self, key_for_log: &str, default: bool) -> bool {
        match self.value_str() {
            Some("true") => true,
            Some("false") => false,
            _ => {
                tracing::warn!("failed to read config bool {key_for_log}: assuming default");
                default
            }
        }
    }

    pub fn value_int_or(&self, key_for_log: &str, default: i64) -> i64 {
        match self.value_str().and_then(|v| v.parse().ok()) {
            Some(v) => v,
            None => {
                if self.exists() {
                    tracing::warn!("failed to read config int {key_for_log}: assuming default");
                }
                default
            }
        }
    }

    pub fn value_path(&self) -> Option<PathBuf> {
        self.value_str().map(PathBuf::from)
    }
}

/// Parse a config file into its root node.
pub fn parse_file(path: &Path) -> Result<EntNode> {
    let text = std::fs::read_to_string(path).map_err(|e| ModError::io(e, path))?;
    parse_str(&text).map_err(|detail| ModError::Config {
        path: path.to_path_buf(),
        detail,
    })
}

/// Parse config text into its root node.
pub fn parse_str(text: &str) -> std::result::Result<EntNode, String> {
    let tokens = tokenize(text)?;
    let mut pos = 0;
    let children = parse_children(&tokens, &mut pos, 0)?;
    if pos != tokens.len() {
        return Err("unbalanced closing brace".into());
    }
    Ok(EntNode {
        name: String::new(),
        value: String::new(),
        children,
    })
}

#[derive(Debug, PartialEq)]
enum Token {
    Word(String),
    Equals,
    Open,
    Close,
}

fn tokenize(text: &str) -> std::result::Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '=' => tokens.push(Token::Equals),
            '{' => tokens.push(Token::Open),
            '}' => tokens.push(Token::Close),
            ';' => {}
            '"' => {
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some(ch) => s.push(ch),
                        None => return Err("unterminated quoted string".into()),
                    }
                }
                tokens.push(Token::Word(s));
            }
            '/' if chars.peek() == Some(&'/') => {
                for ch in chars.by_ref() {
                    if ch == '\n' {
                        break;
                    }
                }
            }
            c if c.is_whitespace() => {}
            c => {
                let mut s = String::from(c);
                while let Some(&ch) = chars.peek() {
                    if ch.is_whitespace() || matches!(ch, '=' | '{' | '}' | ';' | '"') {
                        break;
                    }
                    s.push(ch);
                    chars.next();
                }
                tokens.push(Token::Word(s));
            }
        }
    }
    Ok(tokens)
}

fn parse_children(
    tokens: &[Token],
    pos: &mut usize,
    depth: usize,
) -> std::result::Result<Vec<EntNode>, String> {
    if depth > 64 {
        return Err("config nesting too deep".into());
    }
    let mut out = Vec::new();
    while *pos < tokens.len() {
        match &tokens[*pos] {
            Token::Close => {
                if depth == 0 {
                    return Err("unbalanced closing brace".into());
                }
                *pos += 1;
                return Ok(out);
            }
            Token::Word(name) => {
                *pos += 1;
                let mut node = EntNode {
                    name: name.clone(),
                    ..Default::default()
                };
                if tokens.get(*pos) == Some(&Token::Equals) {
                    *pos += 1;
                    match tokens.get(*pos) {
                        Some(Token::Word(v)) => {
                            node.value = v.clone();
                            *pos += 1;
                        }
                        _ => return Err(format!("'{name} =' missing a value")),
                    }
                }
                if tokens.get(*pos) == Some(&Token::Open) {
                    *pos += 1;
                    node.children = parse_children(tokens, pos, depth + 1)?;
                }
                out.push(node);
            }
            Token::Equals | Token::Open => {
                return Err("expected a key name".into());
            }
        }
    }
    if depth != 0 {
        return Err("unterminated block".into());
    }
    Ok(out)
}
