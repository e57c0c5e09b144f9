#![forbid(unsafe_code)]

//! Announcement payloads. Deterministic for a given entry, metadata and clock value.

use streamcast_domain::{Announcement, Embed, EmbedAuthor, EmbedField, GameInfo, Platform, StreamEntry, UserInfo};

const TWITCH_PURPLE: u32 = 0x9146ff;
const YOUTUBE_RED: u32 = 0xff0000;
const BOX_ART_SIZE: (u32, u32) = (285, 380);
const PREVIEW_SIZE: (u32, u32) = (1280, 720);

/// `#rrggbb` (or `rrggbb`) → 0xRRGGBB.
pub fn parse_colour(s: &str) -> Option<u32> {
	let hex = s.trim().trim_start_matches('#');
	if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
		return None;
	}
	u32::from_str_radix(hex, 16).ok()
}

fn colour_for(entry: &StreamEntry) -> u32 {
	entry
		.colour
		.as_deref()
		.and_then(parse_colour)
		.unwrap_or(match entry.platform {
			Platform::Twitch => TWITCH_PURPLE,
			Platform::YouTube => YOUTUBE_RED,
		})
}

fn display_name<'a>(entry: &'a StreamEntry, user: Option<&'a UserInfo>) -> &'a str {
	user.map(|u| u.display_name.as_str())
		.filter(|n| !n.is_empty())
		.unwrap_or(entry.name.as_str())
}

fn sized_template(template: &str, (width, height): (u32, u32)) -> String {
	template
		.replace("{width}", &width.to_string())
		.replace("{height}", &height.to_string())
}

/// Live preview; `now` busts the platform's image cache between edits.
fn preview_url(login: &str, now: i64) -> String {
	let (w, h) = PREVIEW_SIZE;
	format!(
		"https://static-cdn.jtvnw.net/previews-ttv/live_user_{}-{w}x{h}.jpg?t={now}",
		login.to_ascii_lowercase()
	)
}

fn card_title(entry: &StreamEntry, name: &str) -> String {
	if entry.title.trim().is_empty() {
		format!("{name} is streaming")
	} else {
		entry.title.clone()
	}
}

fn category_fields(entry: &StreamEntry, game: Option<&GameInfo>) -> Vec<EmbedField> {
	let name = game
		.map(|g| g.name.as_str())
		.filter(|n| !n.is_empty())
		.unwrap_or(entry.category_name.as_str());
	if name.is_empty() {
		return Vec::new();
	}
	vec![EmbedField {
		name: "Category".to_string(),
		value: name.to_string(),
		inline: true,
	}]
}

/// Card for a live session; posted on go-live and edited on every content change.
pub fn live_card(entry: &StreamEntry, user: Option<&UserInfo>, game: Option<&GameInfo>, now: i64) -> Announcement {
	let name = display_name(entry, user);
	let login = user.map(|u| u.login.as_str()).unwrap_or(entry.name.as_str());

	Announcement::card(Embed {
		title: card_title(entry, name),
		url: Some(entry.source_url()),
		description: entry.description.clone().filter(|d| !d.trim().is_empty()),
		colour: colour_for(entry),
		author: Some(EmbedAuthor {
			name: format!("{name} is now live on Twitch!"),
			url: Some(entry.source_url()),
			icon_url: user.and_then(|u| u.profile_image_url.clone()),
		}),
		thumbnail_url: game
			.and_then(|g| g.box_art_url.as_deref())
			.map(|t| sized_template(t, BOX_ART_SIZE)),
		image_url: Some(preview_url(login, now)),
		fields: category_fields(entry, game),
		footer: None,
	})
}

/// Replacement card once the stream has ended.
pub fn offline_card(entry: &StreamEntry, user: Option<&UserInfo>, game: Option<&GameInfo>) -> Announcement {
	let name = display_name(entry, user);

	Announcement::card(Embed {
		title: card_title(entry, name),
		url: Some(entry.source_url()),
		description: entry.description.clone().filter(|d| !d.trim().is_empty()),
		colour: colour_for(entry),
		author: Some(EmbedAuthor {
			name: format!("{name} was live on Twitch"),
			url: Some(entry.source_url()),
			icon_url: user.and_then(|u| u.profile_image_url.clone()),
		}),
		thumbnail_url: game
			.and_then(|g| g.box_art_url.as_deref())
			.map(|t| sized_template(t, BOX_ART_SIZE)),
		image_url: None,
		fields: category_fields(entry, game),
		footer: Some("Stream ended".to_string()),
	})
}

pub fn video_announcement(author: &str, link: &str) -> Announcement {
	Announcement::text(format!("{author} has posted a new video: {link}"))
}
