//! Upstream version resolution from registry tag listings.

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::cmp::Ordering;
use thiserror::Error;

use crate::error::parse_json;
use crate::process::{Cmd, Runner};
use crate::release::settings::{Channel, SourceSpec, Sources};

/// The three upstream versions baked into one image build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionSet {
    pub distribution: String,
    pub runtime: String,
    pub companion: String,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("invalid tag pattern '{pattern}' for {image}: {source}")]
    InvalidPattern {
        image: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("no tag of {image} matches '{pattern}'")]
    NoMatchingTag { image: String, pattern: String },

    #[error("{image}: {channel:?} channel needs at least {needed} matching tags, found {found}")]
    NotEnoughTags {
        image: String,
        channel: Channel,
        needed: usize,
        found: usize,
    },
}

/// `skopeo list-tags` output. Only `Tags` is consumed.
#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(rename = "Tags")]
    tags: Vec<String>,
}

/// Fetch every published tag of `image`.
pub fn list_tags(runner: &dyn Runner, image: &str) -> Result<Vec<String>> {
    let output = Cmd::new("skopeo")
        .arg("list-tags")
        .arg(format!("docker://{image}"))
        .run(runner)
        .with_context(|| format!("listing tags of {image}"))?;
    let parsed: TagList = parse_json(&format!("skopeo list-tags {image}"), &output.stdout)?;
    Ok(parsed.tags)
}

/// Filter `tags` by the source pattern, sort them and pick one per `channel`.
///
/// The returned version has the source's `strip_prefix` removed.
pub fn select_tag(
    tags: &[String],
    spec: &SourceSpec,
    channel: Channel,
) -> std::result::Result<String, ResolveError> {
    let pattern = Regex::new(&spec.pattern).map_err(|source| ResolveError::InvalidPattern {
        image: spec.image.clone(),
        pattern: spec.pattern.clone(),
        source,
    })?;

    let mut matching: Vec<&String> = tags.iter().filter(|t| pattern.is_match(t)).collect();
    if matching.is_empty() {
        return Err(ResolveError::NoMatchingTag {
            image: spec.image.clone(),
            pattern: spec.pattern.clone(),
        });
    }
    matching.sort_by(|a, b| compare_tags(a, b));
    matching.dedup();

    let back = match channel {
        Channel::Latest => 1,
        Channel::Stable => 2,
    };
    if matching.len() < back {
        return Err(ResolveError::NotEnoughTags {
            image: spec.image.clone(),
            channel,
            needed: back,
            found: matching.len(),
        });
    }

    let tag = matching[matching.len() - back].as_str();
    let version = match &spec.strip_prefix {
        Some(prefix) => tag.strip_prefix(prefix.as_str()).unwrap_or(tag),
        None => tag,
    };
    Ok(version.to_string())
}

/// Resolve a single source: list its tags and select one.
pub fn resolve_source(runner: &dyn Runner, spec: &SourceSpec, channel: Channel) -> Result<String> {
    let tags = list_tags(runner, &spec.image)?;
    let version = select_tag(&tags, spec, channel)?;
    tracing::info!(image = %spec.image, %version, "resolved upstream version");
    Ok(version)
}

pub fn resolve_versions(
    runner: &dyn Runner,
    sources: &Sources,
    channel: Channel,
) -> Result<VersionSet> {
    Ok(VersionSet {
        distribution: resolve_source(runner, &sources.distribution, channel)
            .context("resolving distribution version")?,
        runtime: resolve_source(runner, &sources.runtime, channel)
            .context("resolving runtime version")?,
        companion: resolve_source(runner, &sources.companion, channel)
            .context("resolving companion tool version")?,
    })
}

/// Order tags so numeric runs compare by value (`9` < `10`, `1.9.0` < `1.10.0`).
fn compare_tags(a: &str, b: &str) -> Ordering {
    let left = tokenize(a);
    let right = tokenize(b);
    for (l, r) in left.iter().zip(right.iter()) {
        let ord = match (l, r) {
            (Token::Num(x), Token::Num(y)) => {
                let x = x.trim_start_matches('0');
                let y = y.trim_start_matches('0');
                x.len().cmp(&y.len()).then_with(|| x.cmp(y))
            }
            (Token::Num(_), Token::Text(_)) => Ordering::Less,
            (Token::Text(_), Token::Num(_)) => Ordering::Greater,
            (Token::Text(x), Token::Text(y)) => x.cmp(y),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    left.len().cmp(&right.len()).then_with(|| a.cmp(b))
}

#[derive(Debug, PartialEq, Eq)]
enum Token<'a> {
    Num(&'a str),
    Text(&'a str),
}

fn tokenize(tag: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut start = 0;
    let mut in_digits: Option<bool> = None;

    for (idx, ch) in tag.char_indices() {
        let digit = ch.is_ascii_digit();
        match in_digits {
            Some(prev) if prev != digit => {
                tokens.push(make_token(&tag[start..idx], prev));
                start = idx;
            }
            _ => {}
        }
        in_digits = Some(digit);
    }
    if let Some(prev) = in_digits {
        tokens.push(make_token(&tag[start..], prev));
    }
    tokens
}

fn make_token(text: &str, digits: bool) -> Token<'_> {
    if digits {
        Token::Num(text)
    } else {
        Token::Text(text)
    }
}
