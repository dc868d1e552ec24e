//! `${...}` interpolation templates using `nom`.
//!
//! A template is plain text with embedded references such as
//! `${server.publicDns}` or `${config.env}`. `$${` writes a literal `${`;
//! a `$` not followed by `{` is kept as text.

use cirrus_common::error::{CirrusError, Result};
use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::char,
    combinator::{map, not, value},
    multi::{many0, separated_list1},
    sequence::{delimited, terminated},
};

/// Namespace that resolves against stack configuration instead of resources.
pub const CONFIG_NAMESPACE: &str = cirrus_common::constants::CONFIG_NAMESPACE;

/// A piece of a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Literal text.
    Text(String),
    /// A dotted reference path, e.g. `["alb", "loadBalancer", "arn"]`.
    Reference(Vec<String>),
}

/// A parsed interpolation template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

const fn is_path_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn path_segment(input: &str) -> IResult<&str, &str> {
    take_while1(is_path_char).parse(input)
}

fn reference(input: &str) -> IResult<&str, Segment> {
    map(
        delimited(tag("${"), separated_list1(char('.'), path_segment), char('}')),
        |parts: Vec<&str>| Segment::Reference(parts.into_iter().map(str::to_string).collect()),
    )
    .parse(input)
}

fn escaped(input: &str) -> IResult<&str, Segment> {
    value(Segment::Text("${".to_string()), tag("$${")).parse(input)
}

fn text(input: &str) -> IResult<&str, Segment> {
    map(take_while1(|c: char| c != '$'), |s: &str| Segment::Text(s.to_string())).parse(input)
}

fn lone_dollar(input: &str) -> IResult<&str, Segment> {
    value(Segment::Text("$".to_string()), terminated(char('$'), not(char('{')))).parse(input)
}

fn segments(input: &str) -> IResult<&str, Vec<Segment>> {
    many0(alt((escaped, reference, text, lone_dollar))).parse(input)
}

impl Template {
    /// Parses a template.
    ///
    /// # Errors
    ///
    /// Returns [`CirrusError::MalformedReference`] for an unterminated or
    /// otherwise unparseable `${...}` expression.
    pub fn parse(input: &str) -> Result<Self> {
        match segments(input) {
            Ok(("", parsed)) => Ok(Self {
                segments: merge_text(parsed),
            }),
            Ok((rest, _)) => Err(CirrusError::MalformedReference {
                input: input.to_string(),
                reason: format!("cannot parse expression starting at `{}`", preview(rest)),
            }),
            Err(e) => Err(CirrusError::MalformedReference {
                input: input.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Returns the parsed segments.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Returns `true` if the template contains no references.
    pub fn is_literal(&self) -> bool {
        self.segments.iter().all(|s| matches!(s, Segment::Text(_)))
    }

    /// Returns the path if the whole template is exactly one reference.
    pub fn as_single_reference(&self) -> Option<&[String]> {
        match self.segments.as_slice() {
            [Segment::Reference(path)] => Some(path),
            _ => None,
        }
    }

    /// Iterates over the reference paths in the template.
    pub fn references(&self) -> impl Iterator<Item = &[String]> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Reference(path) => Some(path.as_slice()),
            Segment::Text(_) => None,
        })
    }
}

fn merge_text(parsed: Vec<Segment>) -> Vec<Segment> {
    let mut merged: Vec<Segment> = Vec::with_capacity(parsed.len());
    for segment in parsed {
        if let (Some(Segment::Text(previous)), Segment::Text(next)) = (merged.last_mut(), &segment) {
            previous.push_str(next);
            continue;
        }
        merged.push(segment);
    }
    merged
}

fn preview(rest: &str) -> String {
    rest.chars().take(24).collect()
}
