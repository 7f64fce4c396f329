use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use super::session::PageSession;
use super::{segment_after, truncate_chars, whole_dollars, PlatformError, PlatformProcessor, Step};
use crate::browser::BrowserEngine;
use crate::config::AutomationTimeouts;
use crate::models::account::SessionPayload;
use crate::models::listing::{ItemCondition, ListingPayload, Platform};

const SELL_URL: &str = "https://www.mercari.com/sell/";
const LOGIN_MARKERS: &[&str] = &["/login", "/signin"];

const MAX_PHOTOS: usize = 12;
const MAX_TITLE_CHARS: usize = 80;
const MAX_DESCRIPTION_CHARS: usize = 1000;

const PHOTO_INPUT: &str = r#"input[type="file"][accept*="image"]"#;
const PHOTO_THUMBNAIL: &str = r#"[data-testid="PhotoThumbnail"]"#;
const TITLE_INPUT: &str = r#"input[data-testid="Title"]"#;
const DESCRIPTION_INPUT: &str = r#"textarea[data-testid="Description"]"#;
const CATEGORY_INPUT: &str = r#"input[data-testid="CategoryInput"]"#;
const CATEGORY_SUGGESTION: &str = r#"[data-testid="CategorySuggestion"]"#;
const BRAND_INPUT: &str = r#"input[data-testid="BrandInput"]"#;
const BRAND_SUGGESTION: &str = r#"[data-testid="BrandSuggestion"]"#;
const PRICE_INPUT: &str = r#"input[data-testid="Price"]"#;
const LIST_BUTTON: &str = r#"button[data-testid="ListButton"]"#;
const ERROR_BANNER: &str = r#"[data-testid="FormErrorMessage"]"#;
const ITEM_LINK: &str = r#"a[href*="/item/m"]"#;

fn condition_label(condition: ItemCondition) -> &'static str {
    match condition {
        ItemCondition::New => "New",
        ItemCondition::LikeNew => "Like new",
        ItemCondition::Good => "Good",
        ItemCondition::Fair => "Fair",
        ItemCondition::Poor => "Poor",
    }
}

/// Canonical item URL for anything that points at a Mercari item page.
fn canonical_listing_url(url: &str) -> Option<String> {
    let id = segment_after(url, "/item/")?;
    let digits = id.strip_prefix('m')?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(format!("https://www.mercari.com/us/item/{}/", id))
}

/// Publishes through Mercari's seller form.
pub struct MercariProcessor {
    session: PageSession,
}

impl MercariProcessor {
    pub fn new(
        engine: Arc<dyn BrowserEngine>,
        session: SessionPayload,
        timeouts: AutomationTimeouts,
    ) -> Self {
        Self {
            session: PageSession::new(Platform::Mercari, engine, session, timeouts),
        }
    }

    async fn pick_suggestion(
        &self,
        input: &str,
        suggestion: &str,
        value: &str,
    ) -> Result<(), PlatformError> {
        let page = self.session.page(Step::FillForm)?;
        page.type_text(input, value).await?;
        page.wait_for(suggestion, self.session.timeouts.element).await?;
        page.click(suggestion).await?;
        Ok(())
    }
}

#[async_trait]
impl PlatformProcessor for MercariProcessor {
    fn platform(&self) -> Platform {
        Platform::Mercari
    }

    async fn initialize(&mut self) -> Result<(), PlatformError> {
        self.session.open(SELL_URL, LOGIN_MARKERS).await?;
        let page = self.session.page(Step::Initialize)?;
        page.wait_for(TITLE_INPUT, self.session.timeouts.element).await?;
        Ok(())
    }

    async fn upload_images(&mut self, images: &[PathBuf]) -> Result<(), PlatformError> {
        if images.is_empty() {
            return Err(PlatformError::ImageUpload("no images to upload".to_string()));
        }
        if images.len() > MAX_PHOTOS {
            return Err(PlatformError::ImageUpload(format!(
                "mercari accepts at most {} photos, got {}",
                MAX_PHOTOS,
                images.len()
            )));
        }

        let timeouts = self.session.timeouts;
        let page = self.session.page(Step::UploadImages)?;
        page.wait_for(PHOTO_INPUT, timeouts.element).await?;
        page.set_files(PHOTO_INPUT, images).await?;

        let seen = self
            .session
            .wait_for_count(Step::UploadImages, PHOTO_THUMBNAIL, images.len(), timeouts.element)
            .await?;
        if seen < images.len() {
            return Err(PlatformError::ImageUpload(format!(
                "{} of {} photos uploaded",
                seen,
                images.len()
            )));
        }
        Ok(())
    }

    async fn fill_form(&mut self, payload: &ListingPayload) -> Result<(), PlatformError> {
        if let Some(field) = payload.first_invalid_field() {
            return Err(PlatformError::FormValidation(field));
        }
        let category = payload
            .category
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| PlatformError::FormValidation("category".to_string()))?;
        let price = payload
            .price
            .and_then(whole_dollars)
            .ok_or_else(|| PlatformError::FormValidation("price".to_string()))?;
        let condition = payload
            .condition
            .ok_or_else(|| PlatformError::FormValidation("condition".to_string()))?;

        let page = self.session.page(Step::FillForm)?;
        page.type_text(TITLE_INPUT, &truncate_chars(&payload.title, MAX_TITLE_CHARS))
            .await?;
        page.type_text(
            DESCRIPTION_INPUT,
            &truncate_chars(&payload.description, MAX_DESCRIPTION_CHARS),
        )
        .await?;

        self.pick_suggestion(CATEGORY_INPUT, CATEGORY_SUGGESTION, category)
            .await?;
        if let Some(brand) = payload.brand.as_deref().filter(|b| !b.trim().is_empty()) {
            self.pick_suggestion(BRAND_INPUT, BRAND_SUGGESTION, brand).await?;
        }

        let condition_option = format!(
            r#"[data-testid="ConditionOption"][aria-label="{}"]"#,
            condition_label(condition)
        );
        page.click(&condition_option).await?;
        page.type_text(PRICE_INPUT, &price.to_string()).await?;
        Ok(())
    }

    async fn submit(&mut self) -> Result<(), PlatformError> {
        let page = self.session.page(Step::Submit)?;
        page.click(LIST_BUTTON).await?;
        self.session
            .settle_after_submit(ERROR_BANNER, |url| canonical_listing_url(url).is_some())
            .await
    }

    async fn get_listing_url(&mut self) -> Result<String, PlatformError> {
        self.session
            .resolve_listing_url(Some(ITEM_LINK), canonical_listing_url)
            .await
    }

    async fn cleanup(&mut self) {
        self.session.close().await;
    }
}
