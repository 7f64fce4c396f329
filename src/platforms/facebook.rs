use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use super::session::PageSession;
use super::{segment_after, truncate_chars, whole_dollars, PlatformError, PlatformProcessor, Step};
use crate::browser::BrowserEngine;
use crate::config::AutomationTimeouts;
use crate::models::account::SessionPayload;
use crate::models::listing::{ItemCondition, ListingPayload, Platform};

const CREATE_URL: &str = "https://www.facebook.com/marketplace/create/item";
const LOGIN_MARKERS: &[&str] = &["/login", "/checkpoint"];

const MAX_PHOTOS: usize = 10;
const MAX_TITLE_CHARS: usize = 100;

const PHOTO_INPUT: &str = r#"input[type="file"][accept*="image"]"#;
const PHOTO_PREVIEW: &str = r#"div[aria-label="Marketplace listing photos"] img"#;
const TITLE_INPUT: &str = r#"label[aria-label="Title"] input"#;
const PRICE_INPUT: &str = r#"label[aria-label="Price"] input"#;
const CATEGORY_INPUT: &str = r#"label[aria-label="Category"] input"#;
const CONDITION_DROPDOWN: &str = r#"label[aria-label="Condition"]"#;
const DESCRIPTION_INPUT: &str = r#"label[aria-label="Description"] textarea"#;
const LOCATION_INPUT: &str = r#"label[aria-label="Location"] input"#;
const LISTBOX_OPTION: &str = r#"[role="listbox"] [role="option"]"#;
const NEXT_BUTTON: &str = r#"div[aria-label="Next"][role="button"]"#;
const PUBLISH_BUTTON: &str = r#"div[aria-label="Publish"][role="button"]"#;
const ERROR_BANNER: &str = r#"div[role="alert"]"#;
const ITEM_LINK: &str = r#"a[href*="/marketplace/item/"]"#;

fn condition_label(condition: ItemCondition) -> &'static str {
    match condition {
        ItemCondition::New => "New",
        ItemCondition::LikeNew => "Used - Like New",
        ItemCondition::Good => "Used - Good",
        ItemCondition::Fair | ItemCondition::Poor => "Used - Fair",
    }
}

fn canonical_listing_url(url: &str) -> Option<String> {
    let id = segment_after(url, "/marketplace/item/")?;
    if !id.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(format!("https://www.facebook.com/marketplace/item/{}/", id))
}

/// Publishes through the Facebook Marketplace item composer.
pub struct FacebookProcessor {
    session: PageSession,
}

impl FacebookProcessor {
    pub fn new(
        engine: Arc<dyn BrowserEngine>,
        session: SessionPayload,
        timeouts: AutomationTimeouts,
    ) -> Self {
        Self {
            session: PageSession::new(Platform::Facebook, engine, session, timeouts),
        }
    }

    /// Type into a combobox and take the first option it offers.
    async fn choose_option(&self, input: &str, value: &str) -> Result<(), PlatformError> {
        let page = self.session.page(Step::FillForm)?;
        page.type_text(input, value).await?;
        page.wait_for(LISTBOX_OPTION, self.session.timeouts.element).await?;
        page.click(LISTBOX_OPTION).await?;
        Ok(())
    }
}

#[async_trait]
impl PlatformProcessor for FacebookProcessor {
    fn platform(&self) -> Platform {
        Platform::Facebook
    }

    async fn initialize(&mut self) -> Result<(), PlatformError> {
        self.session.open(CREATE_URL, LOGIN_MARKERS).await?;
        let page = self.session.page(Step::Initialize)?;
        page.wait_for(PHOTO_INPUT, self.session.timeouts.element).await?;
        Ok(())
    }

    async fn upload_images(&mut self, images: &[PathBuf]) -> Result<(), PlatformError> {
        if images.is_empty() {
            return Err(PlatformError::ImageUpload("no images to upload".to_string()));
        }
        if images.len() > MAX_PHOTOS {
            return Err(PlatformError::ImageUpload(format!(
                "facebook accepts at most {} photos, got {}",
                MAX_PHOTOS,
                images.len()
            )));
        }

        let timeouts = self.session.timeouts;
        self.session
            .page(Step::UploadImages)?
            .set_files(PHOTO_INPUT, images)
            .await?;

        let seen = self
            .session
            .wait_for_count(Step::UploadImages, PHOTO_PREVIEW, images.len(), timeouts.element)
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
        let location = payload
            .platform_field(Platform::Facebook, "location")
            .ok_or_else(|| PlatformError::FormValidation("location".to_string()))?;
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
        page.type_text(PRICE_INPUT, &price.to_string()).await?;
        self.choose_option(CATEGORY_INPUT, category).await?;

        page.click(CONDITION_DROPDOWN).await?;
        let condition_option = format!(
            r#"[role="listbox"] [role="option"][aria-label="{}"]"#,
            condition_label(condition)
        );
        page.wait_for(&condition_option, self.session.timeouts.element)
            .await?;
        page.click(&condition_option).await?;

        page.type_text(DESCRIPTION_INPUT, payload.description.trim())
            .await?;
        self.choose_option(LOCATION_INPUT, location).await?;
        Ok(())
    }

    async fn submit(&mut self) -> Result<(), PlatformError> {
        let timeouts = self.session.timeouts;
        let page = self.session.page(Step::Submit)?;

        // The composer sometimes inserts a delivery step before Publish.
        if page.exists(NEXT_BUTTON).await? {
            page.click(NEXT_BUTTON).await?;
        }
        page.wait_for(PUBLISH_BUTTON, timeouts.element).await?;
        page.click(PUBLISH_BUTTON).await?;

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
