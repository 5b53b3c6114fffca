//! Notification payloads delivered to service workers

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::crypto::MAX_PLAINTEXT_LEN;
use crate::{Error, Result};

/// Maximum characters of a notification body
pub const MAX_BODY_CHARS: usize = 120;
/// Maximum characters of a product name inside a price-drop body
pub const MAX_PRODUCT_NAME_CHARS: usize = 40;
/// Marker appended to truncated text
pub const ELLIPSIS: char = '…';

/// Event type used for price-drop alert tags
pub const PRICE_DROP_EVENT: &str = "price-drop";

/// Notification shown by the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
    /// Notification title
    pub title: String,
    /// Notification text
    pub body: String,
    /// Small icon URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Large image URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Monochrome badge URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge: Option<String>,
    /// Page opened on click
    pub url: String,
    /// Grouping key; distinct tags are shown as distinct notifications
    pub tag: String,
}

impl PushPayload {
    /// Create a payload, capping the body and tagging it with `event_type`
    #[must_use]
    pub fn new(
        title: impl Into<String>,
        body: impl AsRef<str>,
        url: impl Into<String>,
        event_type: &str,
    ) -> Self {
        Self {
            title: title.into(),
            body: truncate_chars(body.as_ref(), MAX_BODY_CHARS),
            icon: None,
            image: None,
            badge: None,
            url: url.into(),
            tag: event_tag(event_type),
        }
    }

    /// Price-drop alert for a tracked product
    ///
    /// Long product names are shortened so the price stays visible.
    #[must_use]
    pub fn price_drop(product_name: &str, previous_price: u64, current_price: u64, url: impl Into<String>) -> Self {
        let name = truncate_chars(product_name.trim(), MAX_PRODUCT_NAME_CHARS);
        let mut body = format!("{name} is now {}", format_price(current_price));
        if let Some(percent) = discount_percent(previous_price, current_price) {
            body.push_str(&format!(" ({percent}% off)"));
        }
        Self::new("Price drop!", body, url, PRICE_DROP_EVENT)
    }

    /// Set the icon URL
    #[must_use]
    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    /// Set the image URL
    #[must_use]
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Set the badge URL
    #[must_use]
    pub fn with_badge(mut self, badge: impl Into<String>) -> Self {
        self.badge = Some(badge.into());
        self
    }

    /// Reject payloads a client could not display
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(Error::InvalidInput("title must not be empty".to_string()));
        }
        if self.body.trim().is_empty() {
            return Err(Error::InvalidInput("body must not be empty".to_string()));
        }
        if self.body.chars().count() > MAX_BODY_CHARS {
            return Err(Error::InvalidInput(format!(
                "body exceeds {MAX_BODY_CHARS} characters"
            )));
        }
        let size = self.to_bytes()?.len();
        if size > MAX_PLAINTEXT_LEN {
            return Err(Error::InvalidInput(format!(
                "payload is {size} bytes, the limit is {MAX_PLAINTEXT_LEN}"
            )));
        }
        Ok(())
    }

    /// Serialize to the bytes handed to the push sender
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// `<event-type>-<unix millis>`
#[must_use]
pub fn event_tag(event_type: &str) -> String {
    format!("{event_type}-{}", Utc::now().timestamp_millis())
}

/// Shorten `text` to at most `max` characters, ending in an ellipsis when cut
#[must_use]
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push(ELLIPSIS);
    out
}

/// Price with thousands separators and won suffix, e.g. `12,900원`
#[must_use]
pub fn format_price(price: u64) -> String {
    let digits = price.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out.push('원');
    out
}

/// Whole-percent discount, `None` when the price did not drop
#[must_use]
pub fn discount_percent(previous: u64, current: u64) -> Option<u64> {
    if previous == 0 || current >= previous {
        return None;
    }
    let percent = u128::from(previous - current) * 100 / u128::from(previous);
    // At most 100 since current < previous
    let percent = u64::try_from(percent).ok()?;
    (percent > 0).then_some(percent)
}
