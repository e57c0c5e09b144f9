#![forbid(unsafe_code)]

/// Outbound chat message: optional plain text plus an optional rich card.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Announcement {
	pub content: Option<String>,
	pub embed: Option<Embed>,
}

impl Announcement {
	pub fn text(content: impl Into<String>) -> Self {
		Self {
			content: Some(content.into()),
			embed: None,
		}
	}

	pub fn card(embed: Embed) -> Self {
		Self {
			content: None,
			embed: Some(embed),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.content.as_deref().map(str::is_empty).unwrap_or(true) && self.embed.is_none()
	}
}

/// Rich card rendered by the messaging platform.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Embed {
	pub title: String,
	pub url: Option<String>,
	pub description: Option<String>,
	/// 0xRRGGBB
	pub colour: u32,
	pub author: Option<EmbedAuthor>,
	pub thumbnail_url: Option<String>,
	pub image_url: Option<String>,
	pub fields: Vec<EmbedField>,
	pub footer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EmbedAuthor {
	pub name: String,
	pub url: Option<String>,
	pub icon_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EmbedField {
	pub name: String,
	pub value: String,
	pub inline: bool,
}
