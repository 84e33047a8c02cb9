//! Class id to class name mapping.
//!
//! Loaded once per process from either a TF Object Detection API
//! `label_map.pbtxt` file or a JSON document, then shared read-only.

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelMap {
    names: BTreeMap<i64, String>,
    ids: HashMap<String, i64>,
}

#[derive(Debug, Deserialize)]
struct LabelItem {
    id: i64,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LabelMapDocument {
    Items { items: Vec<LabelItem> },
    Flat(BTreeMap<String, String>),
}

impl LabelMap {
    /// Build a label map from `(id, name)` pairs, rejecting duplicates and negative ids.
    pub fn from_pairs<I, S>(pairs: I) -> std::result::Result<Self, String>
    where
        I: IntoIterator<Item = (i64, S)>,
        S: Into<String>,
    {
        let mut label_map = LabelMap::default();
        for (id, name) in pairs {
            let name = name.into();
            if id < 0 {
                return Err(format!("class id {} for '{}' is negative", id, name));
            }
            if label_map.names.contains_key(&id) {
                return Err(format!("class id {} is defined more than once", id));
            }
            if label_map.ids.contains_key(&name) {
                return Err(format!("class name '{}' is defined more than once", name));
            }
            label_map.ids.insert(name.clone(), id);
            label_map.names.insert(id, name);
        }
        Ok(label_map)
    }

    /// Load a label map, choosing the parser by file extension (`.json` or pbtxt).
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| invalid(path, e))?;
        let parsed = if path.extension().is_some_and(|ext| ext == "json") {
            Self::from_json_str(&content)
        } else {
            Self::from_pbtxt_str(&content)
        };
        let label_map = parsed.map_err(|reason| invalid(path, reason))?;
        if label_map.is_empty() {
            return Err(invalid(path, "no classes defined"));
        }
        Ok(label_map)
    }

    pub fn from_json_str(content: &str) -> std::result::Result<Self, String> {
        let document: LabelMapDocument =
            serde_json::from_str(content).map_err(|e| e.to_string())?;
        match document {
            LabelMapDocument::Items { items } => {
                Self::from_pairs(items.into_iter().map(|item| (item.id, item.name)))
            }
            LabelMapDocument::Flat(entries) => {
                let mut pairs = Vec::with_capacity(entries.len());
                for (id, name) in entries {
                    let id = id
                        .trim()
                        .parse::<i64>()
                        .map_err(|_| format!("'{}' is not an integer class id", id))?;
                    pairs.push((id, name));
                }
                Self::from_pairs(pairs)
            }
        }
    }

    /// Parse the `item { id: 1 name: 'vehicle' }` text format.
    pub fn from_pbtxt_str(content: &str) -> std::result::Result<Self, String> {
        let tokens = tokenize(content)?;
        let mut tokens = tokens.into_iter();
        let mut pairs = Vec::new();

        while let Some(token) = tokens.next() {
            match token {
                Token::Word(word) if word == "item" => {}
                other => return Err(format!("expected 'item', found {:?}", other)),
            }
            if tokens.next() != Some(Token::Open) {
                return Err("expected '{' after 'item'".to_string());
            }

            let mut id = None;
            let mut name = None;
            loop {
                let key = match tokens.next() {
                    Some(Token::Close) => break,
                    Some(Token::Word(key)) => key,
                    Some(other) => return Err(format!("unexpected {:?} inside item", other)),
                    None => return Err("unterminated item block".to_string()),
                };
                if tokens.next() != Some(Token::Colon) {
                    return Err(format!("expected ':' after '{}'", key));
                }
                let value = match tokens.next() {
                    Some(Token::Word(value)) | Some(Token::Quoted(value)) => value,
                    _ => return Err(format!("missing value for '{}'", key)),
                };
                match key.as_str() {
                    "id" => {
                        id = Some(
                            value
                                .parse::<i64>()
                                .map_err(|_| format!("'{}' is not an integer class id", value))?,
                        )
                    }
                    "name" => name = Some(value),
                    // display_name and other keys are accepted and ignored
                    _ => {}
                }
            }

            match (id, name) {
                (Some(id), Some(name)) => pairs.push((id, name)),
                (None, _) => return Err("item without an id".to_string()),
                (_, None) => return Err("item without a name".to_string()),
            }
        }

        Self::from_pairs(pairs)
    }

    pub fn name(&self, id: i64) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }

    pub fn id(&self, name: &str) -> Option<i64> {
        self.ids.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Entries in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (i64, &str)> {
        self.names.iter().map(|(id, name)| (*id, name.as_str()))
    }
}

fn invalid(path: &Path, reason: impl ToString) -> PipelineError {
    PipelineError::LabelMap {
        path: PathBuf::from(path),
        reason: reason.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Open,
    Close,
    Colon,
    Word(String),
    Quoted(String),
}

fn tokenize(content: &str) -> std::result::Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' => tokens.push(Token::Open),
            '}' => tokens.push(Token::Close),
            ':' => tokens.push(Token::Colon),
            '#' => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            '\'' | '"' => {
                let quote = c;
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some(c) if c == quote => break,
                        Some('\\') => match chars.next() {
                            Some(escaped) => value.push(escaped),
                            None => return Err("unterminated escape".to_string()),
                        },
                        Some(c) => value.push(c),
                        None => return Err("unterminated string".to_string()),
                    }
                }
                tokens.push(Token::Quoted(value));
            }
            c if c.is_whitespace() || c == ',' || c == ';' => {}
            c => {
                let mut word = String::from(c);
                while let Some(&next) = chars.peek() {
                    if next.is_whitespace() || matches!(next, '{' | '}' | ':' | '#' | ',' | ';') {
                        break;
                    }
                    word.push(next);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
        }
    }

    Ok(tokens)
}
