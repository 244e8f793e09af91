//! End-to-end conversation flows against in-memory collaborators.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

use mintbot::bot::render;
use mintbot::bot::router::{
    CANCEL_MINT_SPECIFIC, REQUEST_IMAGE, WALLET_DELEGATE, WALLET_REVOKE,
};
use mintbot::bot::{Bot, unknown_command_message};
use mintbot::channels::{Channel, IncomingEvent};
use mintbot::config::BotConfig;
use mintbot::services::{Capability, CapabilitySet, ImageRecord};
use mintbot::session::PendingAction;
use mintbot::testing::{
    FakeImageGenerator, MemoryImageStore, MemoryPinner, MemoryWalletService, RecordingChannel,
    ScriptedAgent, TestDeps,
};

const CHAT: &str = "1001";
const USER: &str = "42";
const COLLECTION: &str = "7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU";

struct Harness {
    deps: TestDeps,
    bot: Arc<Bot>,
    channel: Arc<RecordingChannel>,
    _dir: TempDir,
}

impl Harness {
    fn new(agent: ScriptedAgent) -> Self {
        Self::with_deps(TestDeps::new(agent))
    }

    fn with_deps(deps: TestDeps) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = BotConfig {
            agent_timeout: Duration::from_secs(30),
            typing_interval: Duration::from_secs(5),
            generated_images_dir: dir.path().join("generated_images"),
        };
        let bot = Arc::new(Bot::new(deps.bot_deps(), config));
        Self {
            deps,
            bot,
            channel: Arc::new(RecordingChannel::new()),
            _dir: dir,
        }
    }

    fn channel(&self) -> Arc<dyn Channel> {
        self.channel.clone()
    }

    async fn text(&self, text: &str) {
        let event = IncomingEvent::text("recording", CHAT, USER, text);
        self.bot.handle_event(self.channel(), event).await;
    }

    async fn press(&self, payload: &str) {
        let event = IncomingEvent::button("recording", CHAT, USER, payload);
        self.bot.handle_event(self.channel(), event).await;
    }

    async fn pending(&self) -> PendingAction {
        self.bot.sessions().pending(CHAT).await
    }

    /// Generate one standard image and return its stored record.
    async fn generated_image(&self, prompt: &str) -> ImageRecord {
        self.text(&format!("/gen {prompt}")).await;
        self.press(&format!("genstandard:{}", urlencoding::encode(prompt)))
            .await;
        self.deps
            .store
            .records()
            .into_iter()
            .rev()
            .find(|image| image.prompt == prompt)
            .unwrap()
    }

    fn last_text(&self) -> String {
        self.channel.last_message().unwrap().text
    }
}

fn record(index: i64) -> ImageRecord {
    ImageRecord {
        id: format!("img-{index}"),
        user_id: USER.to_string(),
        prompt: format!("prompt {index}"),
        filename: format!("image_{index}.png"),
        path: format!("{USER}/image_{index}.png"),
        url: format!("https://storage.test/images/{USER}/image_{index}.png"),
        created_at: Utc.timestamp_opt(1_700_000_000 + index * 60, 0).unwrap(),
    }
}

#[tokio::test]
async fn new_conversation_has_no_pending_action() {
    let harness = Harness::new(ScriptedAgent::new("hi"));
    assert_eq!(harness.pending().await, PendingAction::None);
}

#[tokio::test]
async fn start_shows_main_menu() {
    let harness = Harness::new(ScriptedAgent::new("hi"));
    harness.text("/start").await;

    let message = harness.channel.last_message().unwrap();
    assert_eq!(message.text, render::WELCOME);
    assert_eq!(message.buttons, render::main_menu());
}

#[tokio::test]
async fn generate_delivers_image_with_actions_and_clears_status() {
    let harness = Harness::new(ScriptedAgent::new("hi"));
    let image = harness.generated_image("a red fox").await;

    let images = harness.channel.images();
    assert_eq!(images.len(), 1);
    assert_eq!(
        images[0].caption,
        render::image_caption("a red fox", &image.url)
    );
    assert_eq!(images[0].buttons, render::image_actions(&image.id));
    assert!(!harness.channel.live_texts().contains(&render::GENERATING.to_string()));
    assert_eq!(
        harness.channel.acknowledgements(),
        vec![Some("Generating standard image...".to_string())]
    );
    assert_eq!(harness.deps.images.calls(), 1);
}

#[tokio::test]
async fn transparent_command_generates_without_choice() {
    let harness = Harness::new(ScriptedAgent::new("hi"));
    harness.text("/transparent a glass logo").await;

    let images = harness.channel.images();
    assert_eq!(images.len(), 1);
    assert!(images[0].filename.starts_with("transparent_"));
    assert_eq!(harness.deps.store.records()[0].prompt, "a glass logo");
}

#[tokio::test]
async fn invalid_collection_address_reprompts_and_keeps_state() {
    let harness = Harness::new(ScriptedAgent::new("Minted!"));
    let image = harness.generated_image("a red fox").await;

    harness.press(&format!("mint_specific:{}", image.id)).await;
    let awaiting = PendingAction::AwaitingCollectionAddress {
        image_id: image.id.clone(),
    };
    assert_eq!(harness.pending().await, awaiting);

    harness.text("not-a-solana-address").await;
    assert_eq!(harness.last_text(), render::INVALID_COLLECTION_ADDRESS);
    assert_eq!(harness.pending().await, awaiting);
    assert!(harness.deps.agent.calls().is_empty());
}

#[tokio::test]
async fn valid_collection_address_mints_once_and_resets_state() {
    let harness = Harness::new(ScriptedAgent::new("Minted!"));
    let image = harness.generated_image("a red fox").await;

    harness.press(&format!("mint_specific:{}", image.id)).await;
    let sent_before = harness.channel.texts().len();
    harness.text(COLLECTION).await;

    let calls = harness.deps.agent.calls();
    assert_eq!(calls.len(), 1);
    let (user, instruction) = &calls[0];
    assert_eq!(user, USER);
    assert!(instruction.contains("a red fox"));
    assert!(instruction.contains(&image.url));
    assert!(instruction.contains(COLLECTION));

    assert_eq!(harness.pending().await, PendingAction::None);

    // The status message is gone; only the agent's answer remains.
    let live = harness.channel.live_texts();
    let new_live: Vec<_> = harness.channel.texts()[sent_before..]
        .iter()
        .filter(|text| live.contains(text))
        .cloned()
        .collect();
    assert_eq!(new_live, vec!["Minted!".to_string()]);
    assert_eq!(
        harness.channel.last_message().unwrap().buttons,
        render::back_to_menu()
    );
}

#[tokio::test]
async fn missing_image_clears_state() {
    let harness = Harness::new(ScriptedAgent::new("Minted!"));
    harness.press("mint_specific:does-not-exist").await;
    harness.text(COLLECTION).await;

    assert_eq!(harness.last_text(), render::IMAGE_NOT_FOUND);
    assert_eq!(harness.pending().await, PendingAction::None);
    assert!(harness.deps.agent.calls().is_empty());
}

#[tokio::test]
async fn cancel_resets_state_without_collaborator_calls() {
    let harness = Harness::new(ScriptedAgent::new("Minted!"));
    harness.press("mint_specific:img-1").await;
    assert!(!harness.pending().await.is_none());

    harness.press(CANCEL_MINT_SPECIFIC).await;
    assert_eq!(harness.pending().await, PendingAction::None);
    assert_eq!(harness.last_text(), render::MINT_CANCELLED);
    assert!(harness.deps.agent.calls().is_empty());
    assert_eq!(harness.deps.images.calls(), 0);
}

#[tokio::test]
async fn buttons_are_not_captured_by_pending_flow() {
    let harness = Harness::new(ScriptedAgent::new("hi"));
    harness.press("mint_specific:img-1").await;
    harness.press("show_help").await;

    assert_eq!(harness.last_text(), render::HELP);
    assert!(!harness.pending().await.is_none());
}

#[tokio::test]
async fn image_list_shows_five_newest_and_remainder() {
    let mut deps = TestDeps::new(ScriptedAgent::new("hi"));
    deps.store = Arc::new(MemoryImageStore::with_images((1..=7).map(record).collect()));
    let harness = Harness::with_deps(deps);

    harness.text("/myimages").await;
    let text = harness.last_text();
    assert!(text.starts_with(render::IMAGES_HEADER));
    assert!(text.contains("1. \"prompt 7\""));
    assert!(text.contains("5. \"prompt 3\""));
    assert!(!text.contains("prompt 2\""));
    assert!(text.ends_with("...and 2 more images."));
}

#[tokio::test]
async fn empty_image_list_has_no_remainder() {
    let harness = Harness::new(ScriptedAgent::new("hi"));
    harness.press("view_images").await;

    let text = harness.last_text();
    assert_eq!(text, render::NO_IMAGES);
    assert!(!text.contains("more images"));
}

#[tokio::test]
async fn generator_failure_sends_one_error_and_removes_status() {
    let mut deps = TestDeps::new(ScriptedAgent::new("hi"));
    deps.images = Arc::new(FakeImageGenerator::failing());
    let harness = Harness::with_deps(deps);

    harness.press("genstandard:a%20red%20fox").await;

    assert_eq!(
        harness.channel.live_texts(),
        vec!["Sorry, there was an error generating your image. Please try again later.".to_string()]
    );
    assert_eq!(harness.channel.deleted().len(), 1);
    assert!(harness.channel.images().is_empty());
    assert!(harness.deps.store.records().is_empty());
}

#[tokio::test]
async fn image_prompt_flow_reprompts_on_blank_text() {
    let harness = Harness::new(ScriptedAgent::new("hi"));
    harness.press(REQUEST_IMAGE).await;
    assert_eq!(harness.pending().await, PendingAction::AwaitingImagePrompt);
    assert_eq!(harness.last_text(), render::ASK_FOR_PROMPT);

    harness.text("   ").await;
    assert_eq!(harness.pending().await, PendingAction::AwaitingImagePrompt);
    assert_eq!(harness.last_text(), render::ASK_FOR_PROMPT);

    harness.text("a sunset").await;
    assert_eq!(harness.pending().await, PendingAction::None);
    let message = harness.channel.last_message().unwrap();
    assert_eq!(message.text, render::image_type_prompt("a sunset"));
    assert_eq!(message.buttons, render::image_type_keyboard("a sunset"));
    assert!(harness.deps.agent.calls().is_empty());
}

#[tokio::test]
async fn image_prompt_flow_accepts_gen_command_reply() {
    let harness = Harness::new(ScriptedAgent::new("hi"));
    harness.press(REQUEST_IMAGE).await;
    harness.text("/gen a sunset").await;

    assert_eq!(harness.pending().await, PendingAction::None);
    let message = harness.channel.last_message().unwrap();
    assert_eq!(message.text, render::image_type_prompt("a sunset"));
    assert_eq!(message.buttons, render::image_type_keyboard("a sunset"));
}

#[tokio::test]
async fn store_failure_on_image_list_sends_one_error() {
    let mut deps = TestDeps::new(ScriptedAgent::new("hi"));
    deps.store = Arc::new(MemoryImageStore::failing());
    let harness = Harness::with_deps(deps);

    harness.text("/myimages").await;

    assert_eq!(
        harness.channel.live_texts(),
        vec!["Sorry, there was an error fetching your images. Please try again later.".to_string()]
    );
}

#[tokio::test]
async fn store_failure_after_generation_sends_one_error_and_removes_status() {
    let mut deps = TestDeps::new(ScriptedAgent::new("hi"));
    deps.store = Arc::new(MemoryImageStore::failing());
    let harness = Harness::with_deps(deps);

    harness.press("genstandard:a%20red%20fox").await;

    assert_eq!(harness.deps.images.calls(), 1);
    assert_eq!(
        harness.channel.live_texts(),
        vec!["Sorry, there was an error generating your image. Please try again later.".to_string()]
    );
    assert_eq!(harness.channel.deleted().len(), 1);
    assert!(harness.channel.images().is_empty());
}

#[tokio::test]
async fn wallet_failure_sends_one_error() {
    let mut deps = TestDeps::new(ScriptedAgent::new("hi"));
    deps.wallets = Arc::new(MemoryWalletService::failing());
    let harness = Harness::with_deps(deps);

    harness.text("/wallet").await;

    assert_eq!(
        harness.channel.live_texts(),
        vec!["Sorry, there was an error opening your wallet settings. Please try again later.".to_string()]
    );
}

#[tokio::test]
async fn pinner_failure_sends_one_error_and_removes_status() {
    let mut deps = TestDeps::new(ScriptedAgent::new("Collection created"));
    deps.store = Arc::new(MemoryImageStore::with_images(vec![record(1)]));
    deps.pinner = Arc::new(MemoryPinner::failing());
    let harness = Harness::with_deps(deps);

    harness.press("create_collection:img-1").await;

    assert_eq!(
        harness.channel.live_texts(),
        vec!["Sorry, there was an error creating the NFT collection. Please try again later.".to_string()]
    );
    assert_eq!(harness.channel.deleted().len(), 1);
    assert!(harness.deps.agent.calls().is_empty());
    assert_eq!(harness.bot.sessions().last_metadata_uri(CHAT).await, None);
}

#[tokio::test(start_paused = true)]
async fn button_is_acknowledged_while_conversation_is_busy() {
    let harness = Harness::new(
        ScriptedAgent::new("It's sunny").with_delay(Duration::from_secs(10)),
    );

    let (_, _, acknowledged_early) = tokio::join!(
        harness.text("hello"),
        async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            harness.press(CANCEL_MINT_SPECIFIC).await;
        },
        async {
            tokio::time::sleep(Duration::from_secs(2)).await;
            harness.channel.acknowledgements().len()
        },
    );

    assert_eq!(acknowledged_early, 1);
    assert_eq!(harness.last_text(), render::MINT_CANCELLED);
}

#[tokio::test]
async fn concurrent_addresses_for_one_conversation_mint_once() {
    let harness = Harness::new(
        ScriptedAgent::new("Minted!").with_delay(Duration::from_millis(50)),
    );
    let image = harness.generated_image("a red fox").await;
    harness.press(&format!("mint_specific:{}", image.id)).await;

    tokio::join!(harness.text(COLLECTION), harness.text(COLLECTION));

    let mints = harness
        .deps
        .agent
        .calls()
        .into_iter()
        .filter(|(_, message)| message.contains("Mint this image"))
        .count();
    assert_eq!(mints, 1);
    assert_eq!(harness.pending().await, PendingAction::None);
}

#[tokio::test(start_paused = true)]
async fn typing_heartbeat_stops_after_agent_resolves() {
    let harness = Harness::new(
        ScriptedAgent::new("It's sunny").with_delay(Duration::from_secs(12)),
    );
    harness.text("what's my balance?").await;

    let typing = harness.channel.typing_count();
    // Ticks at 0s, 5s and 10s.
    assert!(typing >= 2, "typing sent {typing} times");
    assert_eq!(harness.last_text(), "It's sunny");

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(harness.channel.typing_count(), typing);
}

#[tokio::test(start_paused = true)]
async fn slow_agent_times_out() {
    let harness = Harness::new(
        ScriptedAgent::new("too late").with_delay(Duration::from_secs(120)),
    );
    harness.text("hello").await;

    assert_eq!(harness.channel.live_texts(), vec![render::TIMED_OUT.to_string()]);
}

#[tokio::test]
async fn agent_failure_sends_message_error() {
    let harness = Harness::new(ScriptedAgent::failing());
    harness.text("hello").await;

    assert_eq!(
        harness.channel.live_texts(),
        vec!["Sorry, there was an error processing your message. Please try again later.".to_string()]
    );
}

#[tokio::test]
async fn unknown_command_suggests_closest() {
    let harness = Harness::new(ScriptedAgent::new("hi"));
    harness.text("/walet").await;

    assert_eq!(harness.last_text(), unknown_command_message("walet"));
    assert!(harness.last_text().contains("/wallet"));
    assert!(harness.deps.agent.calls().is_empty());
}

#[tokio::test]
async fn unsupported_mint_is_refused_without_state_change() {
    let agent = ScriptedAgent::new("hi")
        .with_capabilities(CapabilitySet::new().with(Capability::WalletAddress));
    let harness = Harness::new(agent);
    let image = harness.generated_image("a red fox").await;

    harness.press(&format!("mint_specific:{}", image.id)).await;
    assert_eq!(harness.last_text(), render::MINT_UNAVAILABLE);
    assert_eq!(harness.pending().await, PendingAction::None);

    harness.press(&format!("create_collection:{}", image.id)).await;
    assert_eq!(harness.last_text(), render::COLLECTION_UNAVAILABLE);
    assert!(harness.deps.pinner.pinned().is_empty());
    assert!(harness.deps.agent.calls().is_empty());
}

#[tokio::test]
async fn create_collection_pins_image_and_metadata() {
    let harness = Harness::new(ScriptedAgent::new("Collection created"));
    let image = harness.generated_image("a red fox").await;

    harness.press(&format!("create_collection:{}", image.id)).await;

    assert_eq!(
        harness.deps.pinner.pinned(),
        vec![image.filename.clone(), "a red fox".to_string()]
    );
    let metadata_uri = "https://gateway.test/ipfs/Qm2";
    assert_eq!(
        harness.bot.sessions().last_metadata_uri(CHAT).await.as_deref(),
        Some(metadata_uri)
    );

    let calls = harness.deps.agent.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0].1,
        render::collection_instruction(metadata_uri, Some("a red fox"))
    );

    let live = harness.channel.live_texts();
    assert!(!live.contains(&render::PINNING_IMAGE.to_string()));
    assert!(!live.contains(&render::PINNING_METADATA.to_string()));
    assert!(!live.contains(&render::CREATING_COLLECTION.to_string()));
    assert_eq!(harness.last_text(), "Collection created");
}

#[tokio::test]
async fn metadata_reuse_uses_last_pinned_uri() {
    let harness = Harness::new(ScriptedAgent::new("Collection created"));

    harness
        .text("Create a collection using the metadata uri from previous message")
        .await;
    assert_eq!(harness.last_text(), render::NO_METADATA_URI);
    assert!(harness.deps.agent.calls().is_empty());

    let image = harness.generated_image("a red fox").await;
    harness.press(&format!("create_collection:{}", image.id)).await;
    harness
        .text("Create a collection using the metadata/uri from previous message")
        .await;

    let calls = harness.deps.agent.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(
        calls[1].1,
        render::collection_instruction("https://gateway.test/ipfs/Qm2", None)
    );
}

#[tokio::test]
async fn wallet_menu_toggles_with_delegation() {
    let harness = Harness::new(ScriptedAgent::new("hi"));

    harness.press(WALLET_DELEGATE).await;
    assert_eq!(harness.last_text(), render::NO_WALLET);

    harness.press("wallet:create").await;
    let wallet = harness.deps.wallets.wallet(USER).unwrap();
    assert_eq!(harness.last_text(), render::wallet_created(&wallet.address));

    harness.text("/wallet").await;
    assert_eq!(
        harness.channel.last_message().unwrap().buttons,
        render::wallet_menu(false)
    );

    harness.press(WALLET_DELEGATE).await;
    assert_eq!(harness.last_text(), render::DELEGATED);
    assert!(harness.deps.wallets.wallet(USER).unwrap().is_delegated);

    harness.press("open_wallet").await;
    let buttons = harness.channel.last_message().unwrap().buttons;
    assert!(buttons.iter().flatten().any(|b| b.payload == WALLET_REVOKE));

    harness.press(WALLET_REVOKE).await;
    assert_eq!(harness.last_text(), render::REVOKED);
    assert!(!harness.deps.wallets.wallet(USER).unwrap().is_delegated);
}

#[tokio::test]
async fn wallet_export_shows_key_warning() {
    let harness = Harness::new(ScriptedAgent::new("hi"));
    harness.press("wallet:export").await;
    assert_eq!(harness.last_text(), render::NO_WALLET);

    harness.press("wallet:create").await;
    harness.press("wallet:export").await;
    assert_eq!(
        harness.last_text(),
        render::private_key_warning(&format!("secret-key-{USER}"))
    );
}

#[tokio::test]
async fn run_processes_every_scripted_event() {
    let channel = Arc::new(RecordingChannel::with_events(vec![
        IncomingEvent::text("recording", "1", USER, "/start"),
        IncomingEvent::text("recording", "2", USER, "/help"),
        IncomingEvent::button("recording", "3", USER, "back_to_menu"),
        IncomingEvent::button("recording", "4", USER, "stale:payload"),
    ]));
    let harness = Harness::new(ScriptedAgent::new("hi"));

    Arc::clone(&harness.bot)
        .run(channel.clone() as Arc<dyn Channel>)
        .await
        .unwrap();

    let texts = channel.texts();
    assert_eq!(texts.len(), 3);
    assert!(texts.contains(&render::WELCOME.to_string()));
    assert!(texts.contains(&render::HELP.to_string()));
    assert!(texts.contains(&render::MENU_PROMPT.to_string()));
    // Stale buttons are still acknowledged.
    assert_eq!(channel.acknowledgements(), vec![None, None]);
}
