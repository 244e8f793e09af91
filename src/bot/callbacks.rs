//! Button handlers: menus, image list and wallet management.

use secrecy::ExposeSecret;

use crate::bot::reply::Reply;
use crate::bot::router::{ButtonAction, WalletAction};
use crate::bot::{Bot, render};
use crate::error::Error;
use crate::session::PendingAction;

impl Bot {
    pub(super) async fn handle_button(
        &self,
        reply: &Reply,
        user_id: &str,
        action: ButtonAction,
    ) -> Result<(), Error> {
        match action {
            ButtonAction::RequestImage => {
                self.sessions
                    .set_pending(reply.conversation_id(), PendingAction::AwaitingImagePrompt)
                    .await;
                reply.text(render::ASK_FOR_PROMPT).await?;
            }
            ButtonAction::OpenWallet => self.show_wallet_menu(reply, user_id).await?,
            ButtonAction::ViewImages => self.show_images(reply, user_id).await?,
            ButtonAction::ShowHelp => {
                reply.with_buttons(render::HELP, render::back_to_menu()).await?;
            }
            ButtonAction::BackToMenu => {
                reply
                    .with_buttons(render::MENU_PROMPT, render::main_menu())
                    .await?;
            }
            ButtonAction::Wallet(action) => self.handle_wallet_action(reply, user_id, action).await?,
            ButtonAction::CancelMintSpecific => self.cancel_mint_specific(reply).await?,
            ButtonAction::Generate {
                prompt,
                transparent,
            } => self.generate_image(reply, user_id, &prompt, transparent).await?,
            ButtonAction::CreateCollection { image_id } => {
                self.create_collection(reply, user_id, &image_id).await?
            }
            ButtonAction::MintSpecific { image_id } => {
                self.start_mint_specific(reply, &image_id).await?
            }
        }
        Ok(())
    }

    pub(super) async fn show_images(&self, reply: &Reply, user_id: &str) -> Result<(), Error> {
        let images = self.deps.store.list_by_user(user_id).await?;
        tracing::debug!(user_id, count = images.len(), "Listing images");
        reply
            .with_buttons(render::image_list(&images), render::back_to_menu())
            .await?;
        Ok(())
    }

    pub(super) async fn show_wallet_menu(&self, reply: &Reply, user_id: &str) -> Result<(), Error> {
        let delegated = self.deps.wallets.is_delegated(user_id).await?;
        reply
            .with_buttons(render::WALLET_MENU, render::wallet_menu(delegated))
            .await?;
        Ok(())
    }

    async fn handle_wallet_action(
        &self,
        reply: &Reply,
        user_id: &str,
        action: WalletAction,
    ) -> Result<(), Error> {
        let wallets = &self.deps.wallets;
        match action {
            WalletAction::Create => {
                let wallet = wallets.create_wallet(user_id).await?;
                reply
                    .with_buttons(
                        render::wallet_created(&wallet.address),
                        render::back_to_wallet(),
                    )
                    .await?;
            }
            WalletAction::View => match wallets.get_wallet(user_id).await? {
                Some(wallet) => {
                    reply
                        .with_buttons(
                            render::wallet_address(&wallet.address),
                            render::back_to_wallet(),
                        )
                        .await?;
                }
                None => {
                    reply
                        .with_buttons(render::NO_WALLET, render::no_wallet_keyboard())
                        .await?;
                }
            },
            WalletAction::Export => match wallets.export_private_key(user_id).await? {
                Some(export) => {
                    tracing::info!(user_id, address = %export.address, "Exported private key");
                    reply
                        .with_buttons(
                            render::private_key_warning(export.private_key.expose_secret()),
                            render::back_to_wallet(),
                        )
                        .await?;
                }
                None => {
                    reply
                        .with_buttons(render::NO_WALLET, render::no_wallet_keyboard())
                        .await?;
                }
            },
            WalletAction::Delegate | WalletAction::Revoke => {
                let delegate = action == WalletAction::Delegate;
                if wallets.set_delegation(user_id, delegate).await? {
                    let text = if delegate {
                        render::DELEGATED
                    } else {
                        render::REVOKED
                    };
                    reply.with_buttons(text, render::back_to_wallet()).await?;
                } else {
                    // Nothing was updated: the user has no wallet row.
                    reply
                        .with_buttons(render::NO_WALLET, render::no_wallet_keyboard())
                        .await?;
                }
            }
        }
        Ok(())
    }
}
