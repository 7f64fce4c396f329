use garde::Validate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum::{AsRefStr, Display, EnumString};

/// Marketplaces the worker can publish to through a browser session.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Platform {
    Mercari,
    Facebook,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "title_case")]
pub enum ItemCondition {
    New,
    LikeNew,
    Good,
    Fair,
    Poor,
}

/// Platform-agnostic listing content, fixed once the job is claimed.
///
/// Every field deserializes leniently so that a missing value surfaces as a
/// per-platform form error naming the field rather than a failed job.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ListingPayload {
    #[serde(default)]
    #[garde(length(min = 1, max = 200))]
    pub title: String,

    #[serde(default)]
    #[garde(length(min = 1, max = 5000))]
    pub description: String,

    #[serde(default)]
    #[garde(required, range(min = 0.01))]
    pub price: Option<f64>,

    #[serde(default)]
    #[garde(required)]
    pub condition: Option<ItemCondition>,

    #[serde(default)]
    #[garde(skip)]
    pub category: Option<String>,

    #[serde(default)]
    #[garde(skip)]
    pub brand: Option<String>,

    /// Local paths or http(s) URLs, in display order.
    #[serde(default)]
    #[garde(skip)]
    pub images: Vec<String>,

    /// Extra fields keyed by platform identifier, e.g. `{"facebook": {"location": "Austin, TX"}}`.
    #[serde(default)]
    #[garde(skip)]
    pub platform_fields: HashMap<String, serde_json::Map<String, serde_json::Value>>,
}

impl ListingPayload {
    /// Name of the first field that fails validation, if any.
    pub fn first_invalid_field(&self) -> Option<String> {
        match self.validate() {
            Ok(()) => None,
            Err(report) => report.iter().next().map(|(path, _)| path.to_string()),
        }
    }

    /// A string-valued platform-specific field.
    pub fn platform_field(&self, platform: Platform, key: &str) -> Option<&str> {
        self.platform_fields
            .get(platform.as_ref())
            .and_then(|fields| fields.get(key))
            .and_then(|value| value.as_str())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}
