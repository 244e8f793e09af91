//! Multi-step and long-running flows: image generation, collection
//! creation, minting into a collection and free-text agent turns.

use std::path::Path;
use std::sync::{Arc, LazyLock};

use bytes::Bytes;
use regex::Regex;

use crate::bot::reply::{Reply, StatusMessage, agent_with_timeout};
use crate::bot::{Bot, render};
use crate::channels::OutgoingImage;
use crate::error::Error;
use crate::services::{Capability, ImageRecord, MetadataPinner, is_valid_address};
use crate::session::PendingAction;

static METADATA_REUSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)using the metadata\s*/?\s*uri from previous message")
        .expect("valid metadata reuse pattern")
});

/// Whether `text` asks to reuse the last pinned metadata URI.
pub(super) fn wants_metadata_reuse(text: &str) -> bool {
    METADATA_REUSE.is_match(text)
}

fn image_filename(transparent: bool) -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    if transparent {
        format!("transparent_{millis}.png")
    } else {
        format!("image_{millis}.png")
    }
}

async fn save_local_copy(dir: &Path, filename: &str, bytes: &[u8]) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(dir.join(filename), bytes).await
}

impl Bot {
    /// Generate, keep a local copy, store, and deliver an image.
    pub(super) async fn generate_image(
        &self,
        reply: &Reply,
        user_id: &str,
        prompt: &str,
        transparent: bool,
    ) -> Result<(), Error> {
        let status_text = if transparent {
            render::GENERATING_TRANSPARENT
        } else {
            render::GENERATING
        };
        let mut status = StatusMessage::send(reply, status_text).await?;
        let result = self
            .generate_and_deliver(reply, user_id, prompt, transparent)
            .await;
        status.clear().await;
        result
    }

    async fn generate_and_deliver(
        &self,
        reply: &Reply,
        user_id: &str,
        prompt: &str,
        transparent: bool,
    ) -> Result<(), Error> {
        let bytes = self.deps.images.generate(prompt, transparent).await?;
        let filename = image_filename(transparent);

        if let Err(e) =
            save_local_copy(&self.config.generated_images_dir, &filename, &bytes).await
        {
            tracing::warn!(
                dir = %self.config.generated_images_dir.display(),
                %filename,
                "Failed to keep local image copy: {}",
                e
            );
        }

        let record = self
            .deps
            .store
            .store(&bytes, &filename, user_id, prompt)
            .await?;
        tracing::info!(user_id, image_id = %record.id, transparent, "Image generated");

        reply
            .image(OutgoingImage {
                bytes: Bytes::from(bytes),
                filename,
                caption: render::image_caption(prompt, &record.url),
                buttons: render::image_actions(&record.id),
            })
            .await?;
        Ok(())
    }

    async fn find_image(&self, user_id: &str, image_id: &str) -> Result<Option<ImageRecord>, Error> {
        let images = self.deps.store.list_by_user(user_id).await?;
        Ok(images.into_iter().find(|image| image.id == image_id))
    }

    /// Ask the agent with a typing heartbeat and a timeout.
    async fn ask_agent(&self, reply: &Reply, user_id: &str, message: &str) -> Result<String, Error> {
        let _typing = reply.typing(self.config.typing_interval);
        let response = agent_with_timeout(
            self.config.agent_timeout,
            self.deps.agent.respond(user_id, message),
        )
        .await?;
        Ok(response)
    }

    fn supports(&self, capability: Capability) -> bool {
        self.deps.agent.capabilities().supports(capability)
    }

    pub(super) async fn create_collection(
        &self,
        reply: &Reply,
        user_id: &str,
        image_id: &str,
    ) -> Result<(), Error> {
        let pinner = match &self.deps.pinner {
            Some(pinner) if self.supports(Capability::CreateCollection) => Arc::clone(pinner),
            _ => {
                reply
                    .with_buttons(render::COLLECTION_UNAVAILABLE, render::back_to_menu())
                    .await?;
                return Ok(());
            }
        };

        let Some(image) = self.find_image(user_id, image_id).await? else {
            tracing::info!(user_id, image_id, "Image not found for collection");
            reply
                .with_buttons(render::IMAGE_NOT_FOUND, render::back_to_menu())
                .await?;
            return Ok(());
        };

        let mut status = StatusMessage::send(reply, render::PINNING_IMAGE).await?;
        let result = self
            .pin_and_create_collection(reply, user_id, &image, pinner.as_ref(), &mut status)
            .await;
        status.clear().await;

        let response = result?;
        reply
            .with_buttons(response, render::back_to_menu())
            .await?;
        Ok(())
    }

    async fn pin_and_create_collection(
        &self,
        reply: &Reply,
        user_id: &str,
        image: &ImageRecord,
        pinner: &dyn MetadataPinner,
        status: &mut StatusMessage,
    ) -> Result<String, Error> {
        let bytes = self.deps.fetcher.fetch(&image.url).await?;
        let pinned_image = pinner.pin_file(bytes, &image.filename).await?;
        tracing::debug!(user_id, %pinned_image, "Pinned collection image");

        status.replace(render::PINNING_METADATA).await?;
        let metadata = render::collection_metadata(image, &pinned_image);
        let metadata_uri = pinner.pin_json(&image.prompt, &metadata).await?;
        self.sessions
            .set_last_metadata_uri(reply.conversation_id(), metadata_uri.clone())
            .await;
        tracing::info!(user_id, %metadata_uri, "Pinned collection metadata");

        status.replace(render::CREATING_COLLECTION).await?;
        let instruction = render::collection_instruction(&metadata_uri, Some(&image.prompt));
        self.ask_agent(reply, user_id, &instruction).await
    }

    pub(super) async fn start_mint_specific(&self, reply: &Reply, image_id: &str) -> Result<(), Error> {
        if !self.supports(Capability::MintNft) {
            reply
                .with_buttons(render::MINT_UNAVAILABLE, render::back_to_menu())
                .await?;
            return Ok(());
        }

        self.sessions
            .set_pending(
                reply.conversation_id(),
                PendingAction::AwaitingCollectionAddress {
                    image_id: image_id.to_string(),
                },
            )
            .await;
        reply
            .with_buttons(render::ASK_COLLECTION_ADDRESS, render::cancel_mint_keyboard())
            .await?;
        Ok(())
    }

    pub(super) async fn cancel_mint_specific(&self, reply: &Reply) -> Result<(), Error> {
        let previous = self.sessions.clear_pending(reply.conversation_id()).await;
        tracing::debug!(conversation_id = reply.conversation_id(), ?previous, "Cancelled mint");
        reply
            .with_buttons(render::MINT_CANCELLED, render::back_to_menu())
            .await?;
        Ok(())
    }

    pub(super) async fn continue_pending(
        &self,
        reply: &Reply,
        user_id: &str,
        pending: PendingAction,
        text: &str,
    ) -> Result<(), Error> {
        match pending {
            PendingAction::None => self.handle_free_text(reply, user_id, text).await,
            PendingAction::AwaitingImagePrompt => {
                let prompt = self.router.image_prompt(text);
                if prompt.is_empty() {
                    reply.text(render::ASK_FOR_PROMPT).await?;
                    return Ok(());
                }
                self.sessions.clear_pending(reply.conversation_id()).await;
                self.offer_image_types(reply, &prompt).await
            }
            PendingAction::AwaitingCollectionAddress { image_id } => {
                self.mint_into_collection(reply, user_id, &image_id, text.trim())
                    .await
            }
        }
    }

    async fn mint_into_collection(
        &self,
        reply: &Reply,
        user_id: &str,
        image_id: &str,
        address: &str,
    ) -> Result<(), Error> {
        if !is_valid_address(address) {
            reply.text(render::INVALID_COLLECTION_ADDRESS).await?;
            return Ok(());
        }

        // The flow is consumed from here on, whatever happens next.
        self.sessions.clear_pending(reply.conversation_id()).await;

        let Some(image) = self.find_image(user_id, image_id).await? else {
            reply
                .with_buttons(render::IMAGE_NOT_FOUND, render::back_to_menu())
                .await?;
            return Ok(());
        };

        let mut status = StatusMessage::send(reply, render::MINTING).await?;
        let result = self
            .ask_agent(reply, user_id, &render::mint_instruction(&image, address))
            .await;
        status.clear().await;

        let response = result?;
        tracing::info!(user_id, image_id, collection = address, "Mint requested");
        reply
            .with_buttons(response, render::back_to_menu())
            .await?;
        Ok(())
    }

    pub(super) async fn handle_free_text(
        &self,
        reply: &Reply,
        user_id: &str,
        text: &str,
    ) -> Result<(), Error> {
        if wants_metadata_reuse(text) {
            return self.reuse_metadata_uri(reply, user_id).await;
        }

        let response = self.ask_agent(reply, user_id, text).await?;
        reply.text(response).await?;
        Ok(())
    }

    async fn reuse_metadata_uri(&self, reply: &Reply, user_id: &str) -> Result<(), Error> {
        let Some(uri) = self
            .sessions
            .last_metadata_uri(reply.conversation_id())
            .await
        else {
            reply
                .with_buttons(render::NO_METADATA_URI, render::back_to_menu())
                .await?;
            return Ok(());
        };

        if !self.supports(Capability::CreateCollection) {
            reply
                .with_buttons(render::COLLECTION_UNAVAILABLE, render::back_to_menu())
                .await?;
            return Ok(());
        }

        let response = self
            .ask_agent(reply, user_id, &render::collection_instruction(&uri, None))
            .await?;
        reply
            .with_buttons(response, render::back_to_menu())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_reuse_phrase() {
        assert!(wants_metadata_reuse(
            "Create a collection using the metadata uri from previous message"
        ));
        assert!(wants_metadata_reuse("USING THE METADATA / URI FROM PREVIOUS MESSAGE"));
        assert!(wants_metadata_reuse("using the metadata/uri from previous message"));
        assert!(!wants_metadata_reuse("using the metadata from the last message"));
    }

    #[test]
    fn test_image_filename_prefix() {
        assert!(image_filename(false).starts_with("image_"));
        assert!(image_filename(true).starts_with("transparent_"));
        assert!(image_filename(true).ends_with(".png"));
    }

    #[tokio::test]
    async fn test_save_local_copy_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("generated_images");
        save_local_copy(&nested, "image_1.png", b"png").await.unwrap();
        assert_eq!(std::fs::read(nested.join("image_1.png")).unwrap(), b"png");
    }
}
