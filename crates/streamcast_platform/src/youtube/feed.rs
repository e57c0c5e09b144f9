#![forbid(unsafe_code)]

//! Atom push payloads from the video hub.
//!
//! The hub only ever sends a small, well-known document shape, so entries are pulled
//! out by tag scanning rather than a full XML parser.

use anyhow::Context;

/// One `<entry>` of a push payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
	pub video_id: String,
	pub channel_id: String,
	pub title: String,
	pub link: String,
	pub author: String,
	/// Unix seconds.
	pub published: i64,
}

/// Parse every entry of the payload, in document order (newest first).
///
/// Entries missing a video id, channel id or publish date are skipped. An empty
/// result is not an error; a body that is not a feed at all is.
pub fn parse_feed(body: &str) -> anyhow::Result<Vec<FeedEntry>> {
	if !body.contains("<feed") {
		anyhow::bail!("payload is not an atom feed");
	}

	let mut out = Vec::new();
	let mut rest = body;
	while let Some(start) = find_open_tag(rest, "entry") {
		let after = &rest[start..];
		let Some(end) = after.find("</entry>") else {
			break;
		};
		let section = &after[..end];
		if let Some(entry) = parse_entry(section) {
			out.push(entry);
		}
		rest = &after[end + "</entry>".len()..];
	}

	Ok(out)
}

fn parse_entry(section: &str) -> Option<FeedEntry> {
	let video_id = extract_value(section, "yt:videoId")?;
	let channel_id = extract_value(section, "yt:channelId")?;
	let published = extract_value(section, "published").and_then(|ts| parse_published(&ts).ok())?;

	let title = extract_value(section, "title").unwrap_or_default();
	let author = find_open_tag(section, "author")
		.and_then(|i| extract_value(&section[i..], "name"))
		.unwrap_or_default();
	let link = extract_alternate_link(section).unwrap_or_else(|| format!("https://www.youtube.com/watch?v={video_id}"));

	Some(FeedEntry {
		video_id,
		channel_id,
		title,
		link,
		author,
		published,
	})
}

fn parse_published(ts: &str) -> anyhow::Result<i64> {
	let dt = chrono::DateTime::parse_from_rfc3339(ts).context("parse atom published timestamp")?;
	Ok(dt.timestamp())
}

/// Position of `<tag>` or `<tag ...>`, not matching longer tag names.
fn find_open_tag(xml: &str, tag: &str) -> Option<usize> {
	let pattern = format!("<{tag}");
	let mut offset = 0;
	while let Some(idx) = xml[offset..].find(pattern.as_str()) {
		let at = offset + idx;
		let next = xml[at + pattern.len()..].chars().next();
		if matches!(next, Some('>') | Some(' ') | Some('/') | Some('\n') | Some('\r') | Some('\t')) {
			return Some(at);
		}
		offset = at + pattern.len();
	}
	None
}

fn extract_value(xml: &str, tag: &str) -> Option<String> {
	let start = find_open_tag(xml, tag)?;
	let after = &xml[start..];
	let content_start = after.find('>')? + 1;
	if after[..content_start].ends_with("/>") {
		return None;
	}
	let close = format!("</{tag}>");
	let end = after[content_start..].find(close.as_str())?;
	let value = decode_entities(after[content_start..content_start + end].trim());
	if value.is_empty() { None } else { Some(value) }
}

fn extract_alternate_link(xml: &str) -> Option<String> {
	let mut offset = 0;
	let mut first_href = None;
	while let Some(idx) = find_open_tag(&xml[offset..], "link") {
		let at = offset + idx;
		let tag_end = xml[at..].find('>')? + at;
		let tag = &xml[at..tag_end];
		if let Some(href) = extract_attribute(tag, "href") {
			if extract_attribute(tag, "rel").as_deref() == Some("alternate") {
				return Some(href);
			}
			first_href.get_or_insert(href);
		}
		offset = tag_end;
	}
	first_href
}

fn extract_attribute(tag: &str, attr: &str) -> Option<String> {
	let pattern = format!(" {attr}=");
	let start = tag.find(pattern.as_str())? + pattern.len();
	let after = &tag[start..];
	let quote = after.chars().next().filter(|c| *c == '"' || *c == '\'')?;
	let value = &after[1..];
	let end = value.find(quote)?;
	Some(decode_entities(&value[..end]))
}

fn decode_entities(s: &str) -> String {
	if !s.contains('&') {
		return s.to_string();
	}

	let mut out = String::with_capacity(s.len());
	let mut rest = s;
	while let Some(amp) = rest.find('&') {
		out.push_str(&rest[..amp]);
		rest = &rest[amp..];

		let decoded = rest
			.find(';')
			.filter(|semi| *semi <= 12)
			.and_then(|semi| decode_entity(&rest[1..semi]).map(|c| (c, semi)));
		match decoded {
			Some((c, semi)) => {
				out.push(c);
				rest = &rest[semi + 1..];
			}
			None => {
				out.push('&');
				rest = &rest[1..];
			}
		}
	}
	out.push_str(rest);
	out
}

/// Named XML entities plus `&#NNN;` and `&#xHH;` references. Unknown names stay literal.
fn decode_entity(name: &str) -> Option<char> {
	match name {
		"amp" => Some('&'),
		"lt" => Some('<'),
		"gt" => Some('>'),
		"quot" => Some('"'),
		"apos" => Some('\''),
		_ => {
			let code = name.strip_prefix('#')?;
			let (digits, radix) = match code.strip_prefix('x').or_else(|| code.strip_prefix('X')) {
				Some(hex) => (hex, 16),
				None => (code, 10),
			};
			if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
				return None;
			}
			let value = u32::from_str_radix(digits, radix).ok()?;
			char::from_u32(value)
		}
	}
}
