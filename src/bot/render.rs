//! User-facing texts and keyboards.

use serde_json::{Value, json};

use crate::bot::router::{
    BACK_TO_MENU, CANCEL_MINT_SPECIFIC, CREATE_COLLECTION_PREFIX, GEN_STANDARD_PREFIX,
    GEN_TRANSPARENT_PREFIX, MINT_SPECIFIC_PREFIX, OPEN_WALLET, REQUEST_IMAGE, SHOW_HELP,
    VIEW_IMAGES, WALLET_CREATE, WALLET_DELEGATE, WALLET_EXPORT, WALLET_REVOKE, WALLET_VIEW,
};
use crate::channels::{Button, Keyboard};
use crate::services::ImageRecord;

/// Images listed by `/myimages`.
pub const MAX_LISTED_IMAGES: usize = 5;

/// Telegram rejects `callback_data` longer than this.
pub const MAX_BUTTON_PAYLOAD_BYTES: usize = 64;

pub const WELCOME: &str = "Welcome to Solana Image Generation Bot! I can generate images and help with Solana blockchain.";
pub const MENU_PROMPT: &str = "What would you like to do?";
pub const HELP: &str = "I can help you with:

🖼 Generating images from your text descriptions
👛 Managing your Solana wallet
🔗 Interacting with the Solana blockchain
🌐 Answering questions about Solana, NFTs, and crypto

Use these commands:
/gen [prompt] - Generate an image
/transparent [prompt] - Generate an image with transparent background
/myimages - View your stored images
/wallet - Manage your Solana wallet";

pub const ASK_FOR_PROMPT: &str = "Please send me your image prompt or use /gen [prompt]";
pub const GEN_USAGE: &str = "Please provide a prompt for your image. Example: /gen A beautiful sunset";
pub const TRANSPARENT_USAGE: &str =
    "Please provide a prompt. Example: /transparent A cute cartoon dog";
pub const GENERATING: &str = "🎨 Generating your image, please wait...";
pub const GENERATING_TRANSPARENT: &str = "🎨 Generating your transparent image, please wait...";

pub const NO_IMAGES: &str =
    "You have no stored images yet. Use /gen or send an image prompt to create some!";
pub const IMAGES_HEADER: &str = "🖼️ Your most recent images:\n\n";
pub const IMAGE_NOT_FOUND: &str = "Image not found.";

pub const WALLET_MENU: &str = "Manage your Solana wallet:";
pub const NO_WALLET: &str = "You don't have a wallet yet. Create one first!";
pub const DELEGATED: &str =
    "✅ Server session enabled successfully! You can now use advanced features.";
pub const REVOKED: &str = "✅ Server session revoked successfully!";

pub const ASK_COLLECTION_ADDRESS: &str =
    "Please reply with the collection address where you want to mint this NFT.";
pub const INVALID_COLLECTION_ADDRESS: &str =
    "That doesn't look like a valid collection address. Please try again or press Cancel.";
pub const MINT_CANCELLED: &str = "Mint to specific collection cancelled.";
pub const MINTING: &str = "⏳ Minting your NFT, please wait...";
pub const MINT_UNAVAILABLE: &str =
    "Minting NFTs is not available right now. The Solana signing service is not configured.";
pub const COLLECTION_UNAVAILABLE: &str =
    "Creating NFT collections is not available right now. The Solana signing service or IPFS pinning is not configured.";

pub const PINNING_IMAGE: &str = "📤 Uploading image to Pinata...";
pub const PINNING_METADATA: &str = "📝 Uploading metadata to Pinata...";
pub const CREATING_COLLECTION: &str =
    "🚀 Creating NFT Collection on Solana using your metadata URI...";
pub const NO_METADATA_URI: &str =
    "No metadata URI found from previous message. Please create NFT metadata first.";

pub const TIMED_OUT: &str = "⏱️ The request timed out. Please try again.";
pub const GENERIC_ERROR: &str = "Sorry, an error occurred. Please try again later.";

pub fn main_menu() -> Keyboard {
    vec![
        vec![
            Button::new("Generate Image", REQUEST_IMAGE),
            Button::new("Wallet Settings", OPEN_WALLET),
        ],
        vec![
            Button::new("My Images", VIEW_IMAGES),
            Button::new("Help", SHOW_HELP),
        ],
    ]
}

pub fn back_to_menu() -> Keyboard {
    vec![vec![Button::new("« Back to Menu", BACK_TO_MENU)]]
}

pub fn back_to_wallet() -> Keyboard {
    vec![vec![Button::new("« Back to Wallet Menu", OPEN_WALLET)]]
}

pub fn no_wallet_keyboard() -> Keyboard {
    vec![
        vec![Button::new("Create Wallet", WALLET_CREATE)],
        vec![Button::new("« Back to Wallet Menu", OPEN_WALLET)],
    ]
}

/// The session toggle flips with the delegation flag.
pub fn wallet_menu(delegated: bool) -> Keyboard {
    let session = if delegated {
        Button::new("Revoke Server Session", WALLET_REVOKE)
    } else {
        Button::new("Enable Server Session", WALLET_DELEGATE)
    };
    vec![
        vec![Button::new("Create Wallet", WALLET_CREATE)],
        vec![Button::new("View Address", WALLET_VIEW)],
        vec![Button::new("Export Private Key", WALLET_EXPORT)],
        vec![session],
        vec![Button::new("« Back to Menu", BACK_TO_MENU)],
    ]
}

pub fn cancel_mint_keyboard() -> Keyboard {
    vec![vec![Button::new("Cancel", CANCEL_MINT_SPECIFIC)]]
}

pub fn image_type_prompt(prompt: &str) -> String {
    format!("Please select image type for: \"{prompt}\"")
}

/// "Standard" / "Transparent BG" choice for a prompt.
pub fn image_type_keyboard(prompt: &str) -> Keyboard {
    let encoded = encode_prompt_within(
        prompt,
        MAX_BUTTON_PAYLOAD_BYTES - GEN_TRANSPARENT_PREFIX.len() - 1,
    );
    vec![vec![
        Button::new("Standard", format!("{GEN_STANDARD_PREFIX}:{encoded}")),
        Button::new(
            "Transparent BG",
            format!("{GEN_TRANSPARENT_PREFIX}:{encoded}"),
        ),
    ]]
}

/// URL-encode the longest prefix of `prompt` whose encoding fits `budget`
/// bytes. Characters are never split.
fn encode_prompt_within(prompt: &str, budget: usize) -> String {
    let mut encoded = String::new();
    let mut buf = [0u8; 4];
    for ch in prompt.trim().chars() {
        let piece = urlencoding::encode(ch.encode_utf8(&mut buf));
        if encoded.len() + piece.len() > budget {
            break;
        }
        encoded.push_str(&piece);
    }
    encoded
}

/// Buttons attached to a freshly generated image.
pub fn image_actions(image_id: &str) -> Keyboard {
    vec![vec![
        Button::new(
            "Create NFT Collection",
            format!("{CREATE_COLLECTION_PREFIX}:{image_id}"),
        ),
        Button::new(
            "Mint to Specific Collection",
            format!("{MINT_SPECIFIC_PREFIX}:{image_id}"),
        ),
    ]]
}

pub fn image_caption(prompt: &str, url: &str) -> String {
    format!("Image generated: \"{prompt}\"\n\n{url}")
}

/// At most [`MAX_LISTED_IMAGES`], newest first, with a trailing count of the rest.
pub fn image_list(images: &[ImageRecord]) -> String {
    if images.is_empty() {
        return NO_IMAGES.to_string();
    }

    let mut sorted: Vec<&ImageRecord> = images.iter().collect();
    sorted.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let mut message = IMAGES_HEADER.to_string();
    for (index, image) in sorted.iter().take(MAX_LISTED_IMAGES).enumerate() {
        message.push_str(&format!(
            "{}. \"{}\"\n{}\n\n",
            index + 1,
            image.prompt,
            image.url
        ));
    }
    if sorted.len() > MAX_LISTED_IMAGES {
        message.push_str(&format!(
            "...and {} more images.",
            sorted.len() - MAX_LISTED_IMAGES
        ));
    }
    message.trim_end().to_string()
}

pub fn wallet_created(address: &str) -> String {
    format!(
        "✅ Wallet created successfully!\n\nAddress: {address}\n\nKeep this address safe. You can use it to receive SOL and NFTs."
    )
}

pub fn wallet_address(address: &str) -> String {
    format!("Your wallet address:\n\n{address}\n\nUse this address to receive SOL and NFTs.")
}

pub fn private_key_warning(private_key: &str) -> String {
    format!(
        "⚠️ IMPORTANT: Keep this private key secure and never share it with anyone!\n\nPrivate Key: {private_key}"
    )
}

/// Agent instruction for minting `image` into `collection`.
pub fn mint_instruction(image: &ImageRecord, collection: &str) -> String {
    format!(
        "{}\n\nMint this image as an NFT to collection {} with the url: {}",
        image.prompt, collection, image.url
    )
}

/// Agent instruction for creating a collection from pinned metadata.
pub fn collection_instruction(metadata_uri: &str, name: Option<&str>) -> String {
    match name {
        Some(name) => format!(
            "Please create an NFT collection using this metadata URI: {metadata_uri}\nName: {name}\nUse default values for all other fields."
        ),
        None => format!("Please create an NFT collection using this metadata URI: {metadata_uri}"),
    }
}

/// Collection metadata JSON pinned before the collection is created.
pub fn collection_metadata(image: &ImageRecord, pinned_image_url: &str) -> Value {
    json!({
        "name": image.prompt,
        "symbol": image.prompt,
        "description": image.prompt,
        "image": pinned_image_url,
        "attributes": [
            { "trait_type": "Total Supply", "value": "1000000000" }
        ],
    })
}
