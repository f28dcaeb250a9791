//! Path-addressed access into a schema-less JSON tree.
//!
//! A path is a sequence of segments: field names separated by `.` and
//! sequence positions written as `[n]`, e.g. `profile.emails[0].address`.
//! Reads never create anything; writes create the missing intermediate
//! containers (a map when the next segment is a field name, a sequence when
//! it is an index) so that the document grows to fit whatever is written.

use pest::Parser;
use pest_derive::Parser;
use serde_json::{Map, Value};
use std::fmt;

use crate::error::{Result, UboError};

#[derive(Parser)]
#[grammar = "path.pest"]
struct PathParser;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// A parsed document path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Path {
    text: String,
    segments: Vec<Segment>,
}

impl Path {
    pub fn parse(text: &str) -> Result<Self> {
        let mut pairs = PathParser::parse(Rule::path, text)
            .map_err(|e| UboError::path(text, format!("malformed path: {}", e.variant.message())))?;
        let path = pairs
            .next()
            .ok_or_else(|| UboError::path(text, "empty path"))?;
        let mut segments = Vec::new();
        for pair in path.into_inner() {
            match pair.as_rule() {
                Rule::key => segments.push(Segment::Key(pair.as_str().to_string())),
                Rule::index => {
                    let digits = pair.as_str().trim_start_matches('[').trim_end_matches(']');
                    let position = digits
                        .parse::<usize>()
                        .map_err(|e| UboError::path(text, format!("bad index [{digits}]: {e}")))?;
                    segments.push(Segment::Index(position));
                }
                _ => (),
            }
        }
        Ok(Self {
            text: text.to_string(),
            segments,
        })
    }
    pub fn as_str(&self) -> &str {
        &self.text
    }
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }
    /// True when the root of the addressed tree has to be a sequence.
    pub fn starts_with_index(&self) -> bool {
        matches!(self.segments.first(), Some(Segment::Index(_)))
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

/// How many `null`s a single write may pad a sequence with.
pub const MAX_PADDING: usize = 1024;

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a map",
    }
}

fn container_for(segment: &Segment) -> Value {
    match segment {
        Segment::Key(_) => Value::Object(Map::new()),
        Segment::Index(_) => Value::Array(Vec::new()),
    }
}

/// Reads the node located at `path`. Missing fields, positions past the end
/// and `null` intermediate nodes yield `Ok(None)`.
pub fn get<'v>(root: &'v Value, path: &Path) -> Result<Option<&'v Value>> {
    let mut node = root;
    for segment in &path.segments {
        node = match (segment, node) {
            (Segment::Key(key), Value::Object(map)) => match map.get(key) {
                Some(child) => child,
                None => return Ok(None),
            },
            (Segment::Index(position), Value::Array(seq)) => match seq.get(*position) {
                Some(child) => child,
                None => return Ok(None),
            },
            (_, Value::Null) => return Ok(None),
            (Segment::Key(key), other) => {
                return Err(UboError::path(
                    &path.text,
                    format!("cannot read field '{key}' of {}", kind(other)),
                ));
            }
            (Segment::Index(position), other) => {
                return Err(UboError::path(
                    &path.text,
                    format!("cannot read position [{position}] of {}", kind(other)),
                ));
            }
        };
    }
    Ok(Some(node))
}

// position of the first segment that lands in a container the write creates
fn first_created(root: &Value, path: &Path) -> usize {
    let mut node = root;
    for (position, segment) in path.segments.iter().enumerate() {
        let child = match (segment, node) {
            (Segment::Key(key), Value::Object(map)) => map.get(key),
            (Segment::Index(index), Value::Array(seq)) => seq.get(*index),
            (_, Value::Null) => return position,
            // set fails here before touching anything
            _ => return path.segments.len(),
        };
        match child {
            Some(child) => node = child,
            None => return position + 1,
        }
    }
    path.segments.len()
}

/// Writes `value` at `path`, creating intermediate containers on the way.
/// Writing past the end of a sequence pads it with `null`, up to
/// [`MAX_PADDING`] positions. A failed write leaves the tree unchanged.
pub fn set(root: &mut Value, path: &Path, value: Value) -> Result<()> {
    let created = first_created(root, path);
    for segment in &path.segments[created..] {
        if let Segment::Index(index) = segment {
            if *index >= MAX_PADDING {
                return Err(UboError::path(
                    &path.text,
                    format!("position [{index}] is too far past the end of a new sequence"),
                ));
            }
        }
    }
    let last = path.segments.len().saturating_sub(1);
    let mut node = root;
    for (position, segment) in path.segments.iter().enumerate() {
        if node.is_null() {
            *node = container_for(segment);
        }
        let found = kind(node);
        node = match segment {
            Segment::Key(key) => {
                let map = node.as_object_mut().ok_or_else(|| {
                    UboError::path(&path.text, format!("cannot write field '{key}' into {found}"))
                })?;
                if position == last {
                    map.insert(key.clone(), value);
                    return Ok(());
                }
                map.entry(key.clone()).or_insert(Value::Null)
            }
            Segment::Index(index) => {
                let seq = node.as_array_mut().ok_or_else(|| {
                    UboError::path(&path.text, format!("cannot write position [{index}] into {found}"))
                })?;
                if seq.len() <= *index {
                    let len = index
                        .checked_add(1)
                        .filter(|len| *len - seq.len() <= MAX_PADDING)
                        .ok_or_else(|| {
                            UboError::path(
                                &path.text,
                                format!("position [{index}] is too far past the end of a sequence of {}", seq.len()),
                            )
                        })?;
                    seq.resize(len, Value::Null);
                }
                if position == last {
                    seq[*index] = value;
                    return Ok(());
                }
                &mut seq[*index]
            }
        };
    }
    Ok(())
}
