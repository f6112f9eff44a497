//! Django-style template engine used by the views.
//!
//! Workflow:
//! 1. [`Templates::render`] loads the named template from the template directory.
//! 2. [`tokenize_template`] splits content into Text, Variable and Tag tokens.
//! 3. [`parse_tokens`] builds a tree of [`Node`].
//! 4. If the template starts with `{% extends "base.html" %}`, its blocks replace the
//!    same-named blocks of the base.
//! 5. [`render_nodes`] walks the tree, escaping every `{{ variable }}` for HTML and
//!    expanding `{% if %}` and `{% for %}`.

use crate::error::{Error, Result};
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)(\{\{.*?\}\}|\{%.*?%\})").expect("token pattern is valid")
});

pub type Context = HashMap<String, TemplateValue>;

/// Supported value types for template context
#[derive(Clone, Debug, PartialEq)]
pub enum TemplateValue {
    String(String),
    Bool(bool),
    Number(f64),
    List(Vec<TemplateValue>),
    Object(HashMap<String, TemplateValue>),
}

impl TemplateValue {
    /// Convert the value to a string for rendering
    pub fn as_string(&self) -> String {
        match self {
            TemplateValue::String(s) => s.clone(),
            TemplateValue::Bool(b) => b.to_string(),
            TemplateValue::Number(n) => n.to_string(),
            TemplateValue::List(_) | TemplateValue::Object(_) => String::new(),
        }
    }

    /// Empty strings, empty lists, zero and `false` are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            TemplateValue::String(s) => !s.is_empty(),
            TemplateValue::Bool(b) => *b,
            TemplateValue::Number(n) => *n != 0.0,
            TemplateValue::List(items) => !items.is_empty(),
            TemplateValue::Object(map) => !map.is_empty(),
        }
    }
}

impl fmt::Display for TemplateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_string())
    }
}

impl From<&str> for TemplateValue {
    fn from(s: &str) -> Self {
        TemplateValue::String(s.to_string())
    }
}

impl From<String> for TemplateValue {
    fn from(s: String) -> Self {
        TemplateValue::String(s)
    }
}

impl<T> From<Vec<T>> for TemplateValue
where
    T: Into<TemplateValue>,
{
    fn from(items: Vec<T>) -> Self {
        TemplateValue::List(items.into_iter().map(Into::into).collect())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Text(String),
    Variable(String),
    Tag(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(String),
    Variable(String),
    If {
        condition: String,
        negated: bool,
        then_body: Vec<Node>,
        else_body: Vec<Node>,
    },
    For {
        var_name: String,
        list_name: String,
        body: Vec<Node>,
        empty_body: Vec<Node>,
    },
    Block {
        name: String,
        body: Vec<Node>,
    },
    Extends(String),
}

pub fn tokenize_template(content: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut last_end = 0;
    for mat in TOKEN_RE.find_iter(content) {
        if mat.start() > last_end {
            tokens.push(Token::Text(content[last_end..mat.start()].to_string()));
        }
        let m = mat.as_str();
        if let Some(inner) = m.strip_prefix("{{").and_then(|s| s.strip_suffix("}}")) {
            tokens.push(Token::Variable(inner.trim().to_string()));
        } else if let Some(inner) = m.strip_prefix("{%").and_then(|s| s.strip_suffix("%}")) {
            tokens.push(Token::Tag(inner.trim().to_string()));
        }
        last_end = mat.end();
    }
    if last_end < content.len() {
        tokens.push(Token::Text(content[last_end..].to_string()));
    }
    tokens
}

pub fn parse_tokens(tokens: &[Token]) -> Vec<Node> {
    let mut idx = 0;
    parse_nodes(tokens, &mut idx, &[])
}

/// Consumes tokens until one of `end_tags` (left unconsumed) or the end of input.
fn parse_nodes(tokens: &[Token], idx: &mut usize, end_tags: &[&str]) -> Vec<Node> {
    let mut nodes = Vec::new();
    while *idx < tokens.len() {
        let tag = match &tokens[*idx] {
            Token::Text(t) => {
                nodes.push(Node::Text(t.clone()));
                *idx += 1;
                continue;
            }
            Token::Variable(v) => {
                nodes.push(Node::Variable(v.clone()));
                *idx += 1;
                continue;
            }
            Token::Tag(tag) => tag.as_str(),
        };
        if end_tags.contains(&tag) {
            break;
        }
        *idx += 1;

        if let Some(rest) = tag.strip_prefix("extends ") {
            nodes.push(Node::Extends(rest.trim().trim_matches('"').to_string()));
        } else if let Some(name) = tag.strip_prefix("block ") {
            let body = parse_nodes(tokens, idx, &["endblock"]);
            *idx += 1;
            nodes.push(Node::Block {
                name: name.trim().to_string(),
                body,
            });
        } else if let Some(cond) = tag.strip_prefix("if ") {
            let cond = cond.trim();
            let (negated, condition) = match cond.strip_prefix("not ") {
                Some(c) => (true, c.trim()),
                None => (false, cond),
            };
            let then_body = parse_nodes(tokens, idx, &["else", "endif"]);
            let else_body = if closing_tag(tokens, *idx) == Some("else") {
                *idx += 1;
                parse_nodes(tokens, idx, &["endif"])
            } else {
                Vec::new()
            };
            *idx += 1;
            nodes.push(Node::If {
                condition: condition.to_string(),
                negated,
                then_body,
                else_body,
            });
        } else if let Some(rest) = tag.strip_prefix("for ") {
            let parts: Vec<&str> = rest.split_whitespace().collect();
            if parts.len() != 3 || parts[1] != "in" {
                debug!("Skipping malformed for tag: {}", tag);
                continue;
            }
            let body = parse_nodes(tokens, idx, &["empty", "endfor"]);
            let empty_body = if closing_tag(tokens, *idx) == Some("empty") {
                *idx += 1;
                parse_nodes(tokens, idx, &["endfor"])
            } else {
                Vec::new()
            };
            *idx += 1;
            nodes.push(Node::For {
                var_name: parts[0].to_string(),
                list_name: parts[2].to_string(),
                body,
                empty_body,
            });
        } else {
            debug!("Skipping unknown tag: {}", tag);
        }
    }
    nodes
}

fn closing_tag(tokens: &[Token], idx: usize) -> Option<&str> {
    match tokens.get(idx) {
        Some(Token::Tag(t)) => Some(t.as_str()),
        _ => None,
    }
}

/// Resolves a dotted variable path `a.b.c` within the context
fn resolve_variable<'a>(name: &str, context: &'a Context) -> Option<&'a TemplateValue> {
    let mut keys = name.split('.');
    let mut current = context.get(keys.next()?)?;
    for key in keys {
        match current {
            TemplateValue::Object(map) => current = map.get(key)?,
            _ => return None,
        }
    }
    Some(current)
}

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// Replaces blocks of `base` with the same-named blocks of `overrides`.
fn merge_blocks(base: &[Node], overrides: &HashMap<String, Vec<Node>>) -> Vec<Node> {
    base.iter()
        .map(|node| match node {
            Node::Block { name, body } => Node::Block {
                name: name.clone(),
                body: match overrides.get(name) {
                    Some(child) => child.clone(),
                    None => merge_blocks(body, overrides),
                },
            },
            Node::If {
                condition,
                negated,
                then_body,
                else_body,
            } => Node::If {
                condition: condition.clone(),
                negated: *negated,
                then_body: merge_blocks(then_body, overrides),
                else_body: merge_blocks(else_body, overrides),
            },
            Node::For {
                var_name,
                list_name,
                body,
                empty_body,
            } => Node::For {
                var_name: var_name.clone(),
                list_name: list_name.clone(),
                body: merge_blocks(body, overrides),
                empty_body: merge_blocks(empty_body, overrides),
            },
            other => other.clone(),
        })
        .collect()
}

pub fn render_nodes(nodes: &[Node], context: &Context) -> String {
    let mut out = String::new();
    for node in nodes {
        match node {
            Node::Text(t) => out.push_str(t),
            Node::Variable(name) => {
                if let Some(val) = resolve_variable(name, context) {
                    out.push_str(&escape_html(&val.as_string()));
                }
            }
            Node::If {
                condition,
                negated,
                then_body,
                else_body,
            } => {
                let truthy = resolve_variable(condition, context)
                    .map(TemplateValue::is_truthy)
                    .unwrap_or(false);
                let body = if truthy != *negated {
                    then_body
                } else {
                    else_body
                };
                out.push_str(&render_nodes(body, context));
            }
            Node::For {
                var_name,
                list_name,
                body,
                empty_body,
            } => match resolve_variable(list_name, context) {
                Some(TemplateValue::List(items)) if !items.is_empty() => {
                    let mut local = context.clone();
                    for item in items {
                        local.insert(var_name.clone(), item.clone());
                        out.push_str(&render_nodes(body, &local));
                    }
                }
                _ => out.push_str(&render_nodes(empty_body, context)),
            },
            Node::Block { body, .. } => out.push_str(&render_nodes(body, context)),
            Node::Extends(_) => {}
        }
    }
    out
}

/// Loads templates from a directory and renders them.
#[derive(Clone, Debug)]
pub struct Templates {
    dir: PathBuf,
    debug: bool,
}

impl Templates {
    pub fn new(dir: impl Into<PathBuf>, debug: bool) -> Self {
        Templates {
            dir: dir.into(),
            debug,
        }
    }

    fn load(&self, name: &str) -> Result<Vec<Node>> {
        let path = self.dir.join(name);
        let source = std::fs::read_to_string(&path)
            .map_err(|e| Error::Template(format!("cannot read {}: {}", path.display(), e)))?;
        let nodes = parse_tokens(&tokenize_template(&source));
        if self.debug {
            debug!("Template `{}` AST: {:?}", name, nodes);
        }
        Ok(nodes)
    }

    /// Render `name`, resolving a single level of `{% extends %}`.
    pub fn render(&self, name: &str, context: &Context) -> Result<String> {
        let child = self.load(name)?;
        let base = child.iter().find_map(|node| match node {
            Node::Extends(base) => Some(base.clone()),
            _ => None,
        });

        let nodes = match base {
            Some(base) => {
                let blocks: HashMap<String, Vec<Node>> = child
                    .into_iter()
                    .filter_map(|node| match node {
                        Node::Block { name, body } => Some((name, body)),
                        _ => None,
                    })
                    .collect();
                merge_blocks(&self.load(&base)?, &blocks)
            }
            None => child,
        };
        Ok(render_nodes(&nodes, context))
    }
}
